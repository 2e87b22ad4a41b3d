//! Network management for the daemon-facing API: enough CRUD for a
//! device fleet to exist, nothing more. Richer management (membership,
//! invitations, renames) belongs to the web tier.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use goconnect_coordinator_store::{NetworkStore as _, NewNetwork};
use goconnect_model::{Error, JoinPolicy, Network, Visibility};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub(crate) struct CreateNetworkRequest {
    name: String,
    cidr: String,
    #[serde(default = "default_visibility")]
    visibility: Visibility,
    #[serde(default = "default_join_policy")]
    join_policy: JoinPolicy,
}

fn default_visibility() -> Visibility {
    Visibility::Private
}

fn default_join_policy() -> JoinPolicy {
    JoinPolicy::Open
}

pub(crate) async fn create(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateNetworkRequest>,
) -> Result<(StatusCode, Json<Network>), ApiError> {
    let cidr = request
        .cidr
        .parse()
        .map_err(|e| Error::validation(format!("invalid CIDR {}: {e}", request.cidr)))?;

    let network = state.networks.create(NewNetwork {
        tenant: state.tenant,
        name: request.name,
        cidr,
        visibility: request.visibility,
        join_policy: request.join_policy,
        created_by: state.admin,
    })?;

    tracing::info!(network_id = %network.id, cidr = %network.cidr, "created network");

    Ok((StatusCode::CREATED, Json(network)))
}

pub(crate) async fn list(State(state): State<Arc<AppState>>) -> Json<Vec<Network>> {
    Json(state.networks.list_by_tenant(state.tenant))
}
