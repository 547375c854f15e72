//! OpenAPI specification, served as JSON at `/api-docs/openapi.json`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "vecserve API",
        version = "0.1.0",
        description = "Text-embedding inference service with cross-request micro-batching.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Embeddings", description = "Text to unit-length vector encoding"),
        (name = "Operations", description = "Health, readiness, and liveness probes"),
    ),
    paths(
        crate::rest::create_embeddings,
        crate::rest::health_check,
        crate::rest::readiness,
        crate::rest::liveness,
    ),
    components(schemas(
        vecserve_core::types::EmbeddingRequest,
        vecserve_core::types::EmbeddingResponse,
        vecserve_core::types::HealthResponse,
        vecserve_core::types::ErrorDetail,
    ))
)]
pub struct ApiDoc;
