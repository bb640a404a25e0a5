use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::TrustedDevice;
use crate::services::SessionInfo;
use crate::state::AppState;

/// 信頼済みデバイスの表示用DTO
#[derive(Debug, Serialize)]
pub struct DeviceResponse {
    pub device_id: String,
    pub device_name: String,
    pub ip_address: Option<String>,
    pub created_at: OffsetDateTime,
    pub last_used: OffsetDateTime,
}

impl From<TrustedDevice> for DeviceResponse {
    fn from(device: TrustedDevice) -> Self {
        Self {
            device_id: device.device_id,
            device_name: device.device_name,
            ip_address: device.ip_address,
            created_at: device.created_at,
            last_used: device.last_used,
        }
    }
}

/// 信頼済みデバイス一覧ハンドラー
///
/// GET /api/devices
pub async fn list_devices(
    State(state): State<AppState>,
    Extension(session): Extension<SessionInfo>,
) -> Result<Json<Vec<DeviceResponse>>, AppError> {
    let devices = state
        .trusted_device_repo
        .list_by_user(session.user_id)
        .await?;

    Ok(Json(devices.into_iter().map(DeviceResponse::from).collect()))
}

#[derive(Debug, Serialize)]
pub struct RemoveDeviceResponse {
    pub removed: bool,
}

/// 信頼済みデバイス失効ハンドラー
///
/// DELETE /api/devices/{device_id}
///
/// 自分のデバイスのみ失効できる（user_id でスコープ）
pub async fn remove_device(
    State(state): State<AppState>,
    Extension(session): Extension<SessionInfo>,
    Path(device_id): Path<String>,
) -> Result<Json<RemoveDeviceResponse>, AppError> {
    let removed = state
        .trusted_device_repo
        .remove(session.user_id, &device_id)
        .await?;

    if !removed {
        return Err(AppError::DeviceNotFound);
    }

    tracing::info!(user_id = %session.user_id, "信頼済みデバイスを失効");

    Ok(Json(RemoveDeviceResponse { removed: true }))
}

/// デバッグ用デバイス照会DTO（管理者専用）
#[derive(Debug, Serialize)]
pub struct DebugDeviceResponse {
    pub user_id: Uuid,
    pub device_id: String,
    pub device_name: String,
    pub user_agent: String,
    pub ip_address: Option<String>,
}

/// デバイスIDのみでの照会ハンドラー（管理者デバッグ専用）
///
/// GET /admin/devices/{device_id}
///
/// # Security
/// - ゲートが管理者ロールを強制する
/// - user_id を無視した照合のためアクセス判定には使用禁止
pub async fn debug_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<DebugDeviceResponse>, AppError> {
    let device = state
        .trusted_device_repo
        .find_by_device_id(&device_id)
        .await?
        .ok_or(AppError::DeviceNotFound)?;

    Ok(Json(DebugDeviceResponse {
        user_id: device.user_id,
        device_id: device.device_id,
        device_name: device.device_name,
        user_agent: device.user_agent,
        ip_address: device.ip_address,
    }))
}
