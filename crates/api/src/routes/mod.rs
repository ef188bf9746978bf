pub mod health;
pub mod history;
pub mod images;
pub mod registry;
pub mod system;
pub mod tasks;
pub mod upscale;

use axum::routing::post;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /generate                               submit generation (POST)
/// /generate-video                         submit image-to-video (POST)
/// /generate-image-fusion                  submit multi-image fusion (POST)
///
/// /upscale                                submit upscale (POST)
/// /upscale/batch                          submit one upscale per image (POST)
/// /upscale/algorithms                     algorithm catalog (GET)
/// /upscale/{task_id}                      upscale view (GET)
/// /upscale/image/{task_id}/{filename}     upscaled output (GET)
///
/// /task/{task_id}                         get, delete
/// /task/{task_id}/events                  audit trail (GET)
/// /task/{task_id}/favorite                toggle favorite (POST)
/// /task/{task_id}/cancel                  cancel (POST)
///
/// /history                                list tasks (?limit, offset, order)
/// /favorites                              list favorited tasks
///
/// /image/{task_id}                        primary output (GET)
/// /image/{task_id}/{file}                 output by file name or index (GET)
///
/// /models                                 available base models (GET)
/// /loras                                  available LoRAs (?base_model)
///
/// /queue                                  engine queue passthrough (GET)
/// /health                                 dependency health (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/generate", post(handlers::generation::submit_generate))
        .route("/generate-video", post(handlers::generation::submit_video))
        .route(
            "/generate-image-fusion",
            post(handlers::generation::submit_fusion),
        )
        .nest("/upscale", upscale::router())
        .nest("/task", tasks::router())
        .nest("/image", images::router())
        .merge(history::router())
        .merge(registry::router())
        .merge(system::router())
}
