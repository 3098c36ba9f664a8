use crate::backup;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, require_admin, scope_of, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn export_bundle(params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let workspace_path = PathBuf::from(get_required_str(params, "workspacePath")?);
    let out_path = PathBuf::from(get_required_str(params, "outPath")?);
    let summary = backup::export_workspace_bundle(&workspace_path, &out_path)
        .map_err(|e| HandlerErr::new("backup_failed", format!("{e:#}")))?;
    Ok(json!({
        "bundleFormat": summary.bundle_format,
        "dbSha256": summary.db_sha256,
        "outPath": out_path.to_string_lossy(),
    }))
}

fn import_bundle(params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    require_admin(&scope_of(params))?;
    let workspace_path = PathBuf::from(get_required_str(params, "workspacePath")?);
    let in_path = PathBuf::from(get_required_str(params, "inPath")?);
    let summary = backup::import_workspace_bundle(&in_path, &workspace_path)
        .map_err(|e| HandlerErr::new("backup_failed", format!("{e:#}")))?;
    Ok(json!({
        "bundleFormatDetected": summary.bundle_format_detected,
        "dbSha256": summary.db_sha256,
    }))
}

// Bundles work on paths, not the open workspace: after an import the shell
// re-selects the workspace to pick up the replaced database.
pub fn try_handle(_state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.exportBundle" => Some(match export_bundle(&req.params) {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        }),
        "backup.importBundle" => Some(match import_bundle(&req.params) {
            Ok(result) => ok(&req.id, result),
            Err(e) => e.response(&req.id),
        }),
        _ => None,
    }
}
