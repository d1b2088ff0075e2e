//! Typed operation adapters.
//!
//! Each operation is a request struct implementing [`CsmsRequest`] plus a
//! one-line forwarding method on [`Csms`]. Payload field names follow the
//! protocol's camelCase JSON. The destination is carried alongside the payload,
//! never inside it.

use crate::domain::error::DispatchError;
use crate::domain::request::{CsmsRequest, RequestOptions};
use crate::service::Csms;
use chrono::{DateTime, Utc};
use csms_types::{MessageKind, PeerId};
use serde::{Deserialize, Serialize};

/// Optional detail accompanying a status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusInfo {
    pub reason_code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<String>,
}

/// EVSE (and optionally connector) an operation is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evse {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connector_id: Option<u32>,
}

// === RESET ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetType {
    Immediate,
    OnIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetStatus {
    Accepted,
    Rejected,
    Scheduled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reset {
    #[serde(skip)]
    pub destination: PeerId,
    #[serde(rename = "type")]
    pub reset_type: ResetType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evse_id: Option<u32>,
}

impl Reset {
    pub fn new(destination: impl Into<PeerId>, reset_type: ResetType) -> Self {
        Self {
            destination: destination.into(),
            reset_type,
            evse_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResponse {
    pub status: ResetStatus,
    #[serde(default)]
    pub status_info: Option<StatusInfo>,
}

impl CsmsRequest for Reset {
    const KIND: MessageKind = MessageKind::from_static("Reset");
    type Response = ResetResponse;

    fn destination(&self) -> &PeerId {
        &self.destination
    }
}

// === CHANGE AVAILABILITY ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationalStatus {
    Operative,
    Inoperative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeAvailabilityStatus {
    Accepted,
    Rejected,
    Scheduled,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAvailability {
    #[serde(skip)]
    pub destination: PeerId,
    pub operational_status: OperationalStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evse: Option<Evse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAvailabilityResponse {
    pub status: ChangeAvailabilityStatus,
    #[serde(default)]
    pub status_info: Option<StatusInfo>,
}

impl CsmsRequest for ChangeAvailability {
    const KIND: MessageKind = MessageKind::from_static("ChangeAvailability");
    type Response = ChangeAvailabilityResponse;

    fn destination(&self) -> &PeerId {
        &self.destination
    }
}

// === TRIGGER MESSAGE ===

/// Station-initiated message the CSMS asks to be sent now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageTrigger {
    BootNotification,
    LogStatusNotification,
    FirmwareStatusNotification,
    Heartbeat,
    MeterValues,
    SignChargingStationCertificate,
    SignV2GCertificate,
    StatusNotification,
    TransactionEvent,
    SignCombinedCertificate,
    PublishFirmwareStatusNotification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerMessageStatus {
    Accepted,
    Rejected,
    NotImplemented,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerMessage {
    #[serde(skip)]
    pub destination: PeerId,
    pub requested_message: MessageTrigger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evse: Option<Evse>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerMessageResponse {
    pub status: TriggerMessageStatus,
    #[serde(default)]
    pub status_info: Option<StatusInfo>,
}

impl CsmsRequest for TriggerMessage {
    const KIND: MessageKind = MessageKind::from_static("TriggerMessage");
    type Response = TriggerMessageResponse;

    fn destination(&self) -> &PeerId {
        &self.destination
    }
}

// === UPDATE FIRMWARE ===

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Firmware {
    pub location: String,
    pub retrieve_date_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_date_time: Option<DateTime<Utc>>,
    /// PEM certificate of the firmware signer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_certificate: Option<String>,
    /// Base64 signature over the firmware image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateFirmwareStatus {
    Accepted,
    Rejected,
    AcceptedCanceled,
    InvalidCertificate,
    RevokedCertificate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFirmware {
    #[serde(skip)]
    pub destination: PeerId,
    /// Operation-level id the station echoes in its status notifications.
    pub request_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_interval: Option<u32>,
    pub firmware: Firmware,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFirmwareResponse {
    pub status: UpdateFirmwareStatus,
    #[serde(default)]
    pub status_info: Option<StatusInfo>,
}

impl CsmsRequest for UpdateFirmware {
    const KIND: MessageKind = MessageKind::from_static("UpdateFirmware");
    type Response = UpdateFirmwareResponse;

    fn destination(&self) -> &PeerId {
        &self.destination
    }
}

// === DELETE CERTIFICATE ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateHashData {
    pub hash_algorithm: HashAlgorithm,
    pub issuer_name_hash: String,
    pub issuer_key_hash: String,
    pub serial_number: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteCertificateStatus {
    Accepted,
    Failed,
    NotFound,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCertificate {
    #[serde(skip)]
    pub destination: PeerId,
    pub certificate_hash_data: CertificateHashData,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCertificateResponse {
    pub status: DeleteCertificateStatus,
    #[serde(default)]
    pub status_info: Option<StatusInfo>,
}

impl CsmsRequest for DeleteCertificate {
    const KIND: MessageKind = MessageKind::from_static("DeleteCertificate");
    type Response = DeleteCertificateResponse;

    fn destination(&self) -> &PeerId {
        &self.destination
    }
}

impl Csms {
    pub async fn reset(
        &self,
        request: &Reset,
        options: RequestOptions,
    ) -> Result<ResetResponse, DispatchError> {
        self.dispatch(request, options).await
    }

    pub async fn change_availability(
        &self,
        request: &ChangeAvailability,
        options: RequestOptions,
    ) -> Result<ChangeAvailabilityResponse, DispatchError> {
        self.dispatch(request, options).await
    }

    pub async fn trigger_message(
        &self,
        request: &TriggerMessage,
        options: RequestOptions,
    ) -> Result<TriggerMessageResponse, DispatchError> {
        self.dispatch(request, options).await
    }

    pub async fn update_firmware(
        &self,
        request: &UpdateFirmware,
        options: RequestOptions,
    ) -> Result<UpdateFirmwareResponse, DispatchError> {
        self.dispatch(request, options).await
    }

    pub async fn delete_certificate(
        &self,
        request: &DeleteCertificate,
        options: RequestOptions,
    ) -> Result<DeleteCertificateResponse, DispatchError> {
        self.dispatch(request, options).await
    }
}
