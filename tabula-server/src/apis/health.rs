use poem_openapi::payload::Json;
use poem_openapi::OpenApi;

use super::Tag;

/// Health check related API operations.
pub struct HealthApi;

#[OpenApi(tag = Tag::HealthEndpoints)]
impl HealthApi {
    #[oai(path = "/health/check", method = "get")]
    /// Check Health
    ///
    /// A health check endpoint to check the API is available.
    async fn get_health_check(&self) -> Json<bool> {
        Json(true)
    }
}
