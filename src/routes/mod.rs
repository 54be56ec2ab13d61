use axum::http::HeaderValue;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod admin;
pub mod eligibility;
pub mod features;
pub mod health;
pub mod members;
pub mod verifications;
pub mod wire;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .filter_map(|value| match value.parse::<HeaderValue>() {
                Ok(header) => Some(header),
                Err(_) => {
                    tracing::warn!(origin = value, "ignoring invalid CORS allowed origin");
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let eligibility_routes = Router::new()
        .route("/CheckStandardEligibility", post(eligibility::check_standard))
        .route("/CheckAlternateEligibility", post(eligibility::check_alternate))
        .route(
            "/CheckEligibilityOverEligibility",
            post(eligibility::check_overeligibility),
        )
        .route("/CheckNoDOBEligibility", post(eligibility::check_no_dob))
        .route("/CheckMultistepEligibility", post(eligibility::check_multistep))
        .route(
            "/CheckClientSpecificEligibility",
            post(eligibility::check_client_specific),
        )
        .route("/CheckBasicEligibility", post(eligibility::check_basic))
        .route("/CheckEmployerEligibility", post(eligibility::check_employer))
        .route(
            "/CheckHealthPlanEligibility",
            post(eligibility::check_healthplan),
        )
        .route("/CheckPreEligibility", post(eligibility::check_pre_eligibility));

    let member_routes = Router::new()
        .route("/GetMemberById", post(members::get_member_by_id))
        .route(
            "/GetMemberByOrgIdentity",
            post(members::get_member_by_org_identity),
        )
        .route(
            "/GetWalletEnablementById",
            post(members::get_wallet_enablement_by_id),
        )
        .route(
            "/GetWalletEnablementByOrgIdentity",
            post(members::get_wallet_enablement_by_org_identity),
        )
        .route(
            "/GetWalletEnablementByUserId",
            post(members::get_wallet_enablement_by_user_id),
        );

    let verification_routes = Router::new()
        .route(
            "/GetVerificationForUser",
            post(verifications::get_verification_for_user),
        )
        .route(
            "/GetAllVerificationsForUser",
            post(verifications::get_all_verifications_for_user),
        )
        .route(
            "/CreateVerificationForUser",
            post(verifications::create_verification_for_user),
        )
        .route(
            "/CreateMultipleVerificationsForUser",
            post(verifications::create_multiple_verifications_for_user),
        )
        .route(
            "/CreateFailedVerification",
            post(verifications::create_failed_verification),
        )
        .route(
            "/DeactivateVerificationForUser",
            post(verifications::deactivate_verification_for_user),
        )
        .route(
            "/GetOtherUserIdsInFamily",
            post(verifications::get_other_user_ids_in_family),
        );

    let feature_routes = Router::new()
        .route(
            "/GetEligibleFeaturesForUser",
            post(features::get_eligible_features_for_user),
        )
        .route(
            "/GetEligibleFeaturesForUserAndOrg",
            post(features::get_eligible_features_for_user_and_org),
        )
        .route(
            "/GetEligibleFeaturesBySubPopulationId",
            post(features::get_eligible_features_by_sub_population_id),
        )
        .route(
            "/GetSubPopulationIdForUser",
            post(features::get_sub_population_id_for_user),
        )
        .route(
            "/GetSubPopulationIdForUserAndOrg",
            post(features::get_sub_population_id_for_user_and_org),
        );

    let admin_routes = Router::new().route(
        "/CreateEligibilityMemberTestRecordsForOrganization",
        post(admin::create_test_member_records),
    );

    let rpc_routes = Router::new()
        .merge(eligibility_routes)
        .merge(member_routes)
        .merge(verification_routes)
        .merge(feature_routes)
        .merge(admin_routes);

    Router::new()
        .nest("/rpc", rpc_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
