pub mod health;
pub mod proxy;

use axum::Router;

pub fn router() -> Router {
    Router::new().merge(health::router()).merge(proxy::router())
}
