//! Feature eligibility by sub-population.
//!
//! `None` feature lists mean "no restriction": the organization has no
//! population configured. An empty list means the member is unassigned.

use chrono::Utc;
use tracing::{error, info};

use super::error::EligibilityResult;
use super::EligibilityService;
use crate::domain::{FeatureType, LinkedVerification};
use crate::populations::{effective_population, parse_feature_ids, resolve_sub_population};

/// Sub-population of a user, and whether their organization has a population at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubPopulationLookup {
    pub sub_population_id: Option<i64>,
    pub has_population: bool,
}

impl SubPopulationLookup {
    const NO_POPULATION: Self = Self {
        sub_population_id: None,
        has_population: false,
    };

    fn features(self, resolved: Option<Vec<i64>>) -> Option<Vec<i64>> {
        match self.sub_population_id {
            Some(_) => resolved,
            None if self.has_population => Some(Vec::new()),
            None => None,
        }
    }
}

impl EligibilityService {
    async fn sub_population_for(
        &self,
        user_id: i64,
        organization_id: Option<i64>,
    ) -> EligibilityResult<SubPopulationLookup> {
        let now = Utc::now();
        let latest: Option<LinkedVerification> = self
            .store
            .verifications_for_user(user_id)
            .await?
            .into_iter()
            .filter(|linked| linked.verification.is_active(now))
            .filter(|linked| {
                organization_id.map_or(true, |id| linked.verification.organization_id == id)
            })
            .max_by_key(|linked| (linked.verification.verified_at, linked.verification.id));

        let Some(linked) = latest else {
            info!(user_id, "no verification found for sub-population lookup");
            return Ok(SubPopulationLookup::NO_POPULATION);
        };
        let org = linked.verification.organization_id;
        let Some(population) = effective_population(self.store.as_ref(), org, now).await? else {
            return Ok(SubPopulationLookup::NO_POPULATION);
        };

        let read_v2 = self.v2_read_enabled(org);
        let member = match (read_v2, linked.member_2, linked.member) {
            (true, Some(member_2), _) => Some(member_2),
            (true, None, Some(member)) => {
                error!(
                    user_id,
                    member_id = member.id,
                    verification_id = linked.verification.id,
                    "member_2 not found for verification, falling back to member_versioned"
                );
                Some(member)
            }
            (_, _, member) => member,
        };
        let Some(member) = member else {
            info!(user_id, organization_id = org, "verification has no linked member");
            return Ok(SubPopulationLookup {
                sub_population_id: None,
                has_population: true,
            });
        };

        Ok(SubPopulationLookup {
            sub_population_id: resolve_sub_population(&population, &member),
            has_population: true,
        })
    }

    pub async fn get_sub_population_id_for_user(
        &self,
        user_id: i64,
    ) -> EligibilityResult<SubPopulationLookup> {
        self.sub_population_for(user_id, None).await
    }

    pub async fn get_sub_population_id_for_user_and_org(
        &self,
        user_id: i64,
        organization_id: i64,
    ) -> EligibilityResult<SubPopulationLookup> {
        self.sub_population_for(user_id, Some(organization_id)).await
    }

    /// `None` when the sub-population does not exist; `[]` when it lists nothing
    /// for the feature type.
    pub async fn get_eligible_features_by_sub_population_id(
        &self,
        sub_population_id: i64,
        feature_type: FeatureType,
    ) -> EligibilityResult<Option<Vec<i64>>> {
        let Some(sub_population) = self.store.get_sub_population(sub_population_id).await? else {
            return Ok(None);
        };
        Ok(Some(
            sub_population
                .feature_set_details_json
                .get(&feature_type.key())
                .map(|csv| parse_feature_ids(csv))
                .unwrap_or_default(),
        ))
    }

    async fn features_for(
        &self,
        lookup: SubPopulationLookup,
        feature_type: FeatureType,
    ) -> EligibilityResult<Option<Vec<i64>>> {
        let resolved = match lookup.sub_population_id {
            Some(id) => {
                self.get_eligible_features_by_sub_population_id(id, feature_type)
                    .await?
            }
            None => None,
        };
        Ok(lookup.features(resolved))
    }

    pub async fn get_eligible_features_for_user(
        &self,
        user_id: i64,
        feature_type: FeatureType,
    ) -> EligibilityResult<Option<Vec<i64>>> {
        let lookup = self.get_sub_population_id_for_user(user_id).await?;
        self.features_for(lookup, feature_type).await
    }

    pub async fn get_eligible_features_for_user_and_org(
        &self,
        user_id: i64,
        organization_id: i64,
        feature_type: FeatureType,
    ) -> EligibilityResult<Option<Vec<i64>>> {
        let lookup = self
            .get_sub_population_id_for_user_and_org(user_id, organization_id)
            .await?;
        self.features_for(lookup, feature_type).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Duration;
    use serde_json::json;

    use super::super::testing::{fixture, new_member, organization, Fixture};
    use super::super::verification::CreateVerificationRequest;
    use super::*;
    use crate::domain::{NewPopulation, NewSubPopulation};
    use crate::store::{MemberSource, RecordStore};

    async fn verified_user(fx: &Fixture, work_state: &str) {
        fx.org(organization(1)).await;
        let mut row = new_member(1, "c1", "jane@acme.com");
        row.work_state = Some(work_state.into());
        let member = fx.member(MemberSource::Versioned, row).await;
        fx.service
            .create_verification_for_user(&CreateVerificationRequest {
                user_id: Some(9),
                verification_type: "PRIMARY".into(),
                organization_id: Some(1),
                eligibility_member_id: Some(member.id),
                ..CreateVerificationRequest::default()
            })
            .await
            .unwrap();
    }

    async fn configure_population(fx: &Fixture) -> i64 {
        let population = fx
            .store
            .persist_population(NewPopulation {
                organization_id: 1,
                activated_at: Some(Utc::now() - Duration::days(1)),
                deactivated_at: None,
                sub_pop_lookup_keys_csv: "work_state".into(),
                sub_pop_lookup_map_json: json!({}),
                advanced: false,
            })
            .await
            .unwrap();
        let sub = fx
            .store
            .persist_sub_population(NewSubPopulation {
                population_id: population.id,
                feature_set_name: "NY".into(),
                feature_set_details_json: BTreeMap::from([
                    ("1".to_string(), "10,11".to_string()),
                    ("2".to_string(), String::new()),
                ]),
            })
            .await
            .unwrap();
        fx.store
            .persist_population(NewPopulation {
                organization_id: 1,
                activated_at: Some(Utc::now() - Duration::hours(1)),
                deactivated_at: None,
                sub_pop_lookup_keys_csv: "work_state".into(),
                sub_pop_lookup_map_json: json!({ "NY": sub.id }),
                advanced: false,
            })
            .await
            .unwrap();
        sub.id
    }

    #[tokio::test]
    async fn no_population_means_no_restriction() {
        let fx = fixture();
        verified_user(&fx, "NY").await;
        let features = fx
            .service
            .get_eligible_features_for_user(9, FeatureType::Track)
            .await
            .unwrap();
        assert_eq!(features, None);
    }

    #[tokio::test]
    async fn assigned_members_get_their_feature_ids() {
        let fx = fixture();
        verified_user(&fx, "NY").await;
        let sub_id = configure_population(&fx).await;

        let lookup = fx.service.get_sub_population_id_for_user(9).await.unwrap();
        assert_eq!(lookup.sub_population_id, Some(sub_id));
        assert!(lookup.has_population);
        assert_eq!(
            fx.service
                .get_eligible_features_for_user(9, FeatureType::Track)
                .await
                .unwrap(),
            Some(vec![10, 11])
        );
        assert_eq!(
            fx.service
                .get_eligible_features_for_user_and_org(9, 1, FeatureType::Wallet)
                .await
                .unwrap(),
            Some(vec![])
        );
    }

    #[tokio::test]
    async fn unassigned_members_get_nothing() {
        let fx = fixture();
        verified_user(&fx, "CA").await;
        configure_population(&fx).await;
        assert_eq!(
            fx.service
                .get_eligible_features_for_user(9, FeatureType::Track)
                .await
                .unwrap(),
            Some(vec![])
        );
    }

    #[tokio::test]
    async fn unknown_sub_population_has_no_features() {
        let fx = fixture();
        assert_eq!(
            fx.service
                .get_eligible_features_by_sub_population_id(404, FeatureType::Track)
                .await
                .unwrap(),
            None
        );
    }
}
