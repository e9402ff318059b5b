use actix_web::{get, web};
use serde::Serialize;

use crate::llm::{models_by_provider, Model};

#[derive(Serialize)]
pub struct ProviderGroup {
    provider: &'static str,
    models: Vec<&'static Model>,
}

/// The static model catalog, grouped by provider for the picker. Public:
/// the catalog is the same for every caller, signed in or not.
#[get("/models")]
pub async fn list_models() -> web::Json<Vec<ProviderGroup>> {
    let groups = models_by_provider()
        .into_iter()
        .map(|(provider, models)| ProviderGroup { provider, models })
        .collect();
    web::Json(groups)
}
