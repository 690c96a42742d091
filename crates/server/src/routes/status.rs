use axum::{extract::State, response::Json as ResponseJson};
use services::services::dispatch::{Dispatcher, StatusSnapshot};
use utils::response::ApiResponse;

/// Read-only snapshot of admission state and tracked conversations.
pub async fn get_status(
    State(dispatcher): State<Dispatcher>,
) -> ResponseJson<ApiResponse<StatusSnapshot>> {
    ResponseJson(ApiResponse::success(dispatcher.status_snapshot()))
}
