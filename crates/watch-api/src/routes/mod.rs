mod channels;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    channels::router()
}
