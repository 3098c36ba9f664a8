use super::handlers;
use super::types::{AppState, Request};
use crate::ipc::error::err;

pub fn handle_request(state: &mut AppState, req: Request) -> serde_json::Value {
    if let Some(resp) = handlers::core::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::classes::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::subjects::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::teachers::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::students::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::parents::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::lessons::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::assessments::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::results::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::attendance::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::fees::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::bulletin::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::messages::try_handle(state, &req) {
        return resp;
    }
    if let Some(resp) = handlers::backup::try_handle(state, &req) {
        return resp;
    }

    err(
        &req.id,
        "not_implemented",
        format!("unknown method: {}", req.method),
        None,
    )
}
