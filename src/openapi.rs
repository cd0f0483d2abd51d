use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::features::health::handler::health_check,
        crate::features::health::handler::metrics,
        crate::features::og::handler::og_image,
        crate::features::og::handler::og_image_alias,
    ),
    components(schemas(
        crate::features::health::handler::HealthResponse,
        crate::features::og::ComponentHealth,
        crate::features::og::ComponentStatus,
    )),
    tags(
        (
            name = "OgImage",
            description = "Open Graph 预览图：标题、副标题与 crates.io / GitHub release 版本徽章。"
        ),
        (name = "Health", description = "健康检查与运行指标。"),
    ),
    info(
        title = "Apex SDK OG Image API",
        version = env!("CARGO_PKG_VERSION"),
        description = "为 Apex SDK 文档站按需生成社交预览图（Axum + resvg）。"
    )
)]
pub struct ApiDoc;
