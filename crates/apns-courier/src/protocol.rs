//! Binary framing for the APNS gateway (enhanced notification format).
//!
//! All multi-byte integers are big-endian. A notification frame carries a
//! positional identifier; the gateway answers only on failure, with an error
//! frame naming that identifier.

use crate::error::{CourierError, CourierResult};
use push_database::Notification;
use serde::Serialize;

/// Command byte of an enhanced notification frame.
pub const COMMAND_NOTIFICATION: u8 = 0x01;

/// Command byte of an error-response frame.
pub const COMMAND_ERROR_RESPONSE: u8 = 0x08;

/// Exact length of an error-response frame.
pub const ERROR_FRAME_LEN: usize = 1 + 1 + 4;

/// Length of a binary device token.
pub const DEVICE_TOKEN_LEN: usize = 32;

/// Largest JSON payload the gateway accepts by default.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 2048;

/// Status code reported for a notification.
///
/// Every variant except `ProtocolDecodeError` mirrors a gateway status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum GatewayStatus {
    NoError,
    ProcessingError,
    MissingDeviceToken,
    MissingTopic,
    MissingPayload,
    InvalidTokenSize,
    InvalidTopicSize,
    InvalidPayloadSize,
    InvalidToken,
    ShutdownImminent,
    UnknownError,
    /// Local only: an error frame arrived but could not be decoded.
    ProtocolDecodeError,
}

impl GatewayStatus {
    /// Persisted code for `ProtocolDecodeError`, outside the wire range.
    pub const PROTOCOL_DECODE_ERROR_CODE: i32 = -1;

    /// Convert from wire format byte.
    pub fn from_byte(byte: u8) -> CourierResult<Self> {
        match byte {
            0 => Ok(GatewayStatus::NoError),
            1 => Ok(GatewayStatus::ProcessingError),
            2 => Ok(GatewayStatus::MissingDeviceToken),
            3 => Ok(GatewayStatus::MissingTopic),
            4 => Ok(GatewayStatus::MissingPayload),
            5 => Ok(GatewayStatus::InvalidTokenSize),
            6 => Ok(GatewayStatus::InvalidTopicSize),
            7 => Ok(GatewayStatus::InvalidPayloadSize),
            8 => Ok(GatewayStatus::InvalidToken),
            10 => Ok(GatewayStatus::ShutdownImminent),
            255 => Ok(GatewayStatus::UnknownError),
            other => Err(CourierError::Protocol(format!(
                "Unknown status byte: {:#04x}",
                other
            ))),
        }
    }

    /// Convert to wire format byte. `None` for local-only statuses.
    pub fn to_byte(self) -> Option<u8> {
        match self {
            GatewayStatus::NoError => Some(0),
            GatewayStatus::ProcessingError => Some(1),
            GatewayStatus::MissingDeviceToken => Some(2),
            GatewayStatus::MissingTopic => Some(3),
            GatewayStatus::MissingPayload => Some(4),
            GatewayStatus::InvalidTokenSize => Some(5),
            GatewayStatus::InvalidTopicSize => Some(6),
            GatewayStatus::InvalidPayloadSize => Some(7),
            GatewayStatus::InvalidToken => Some(8),
            GatewayStatus::ShutdownImminent => Some(10),
            GatewayStatus::UnknownError => Some(255),
            GatewayStatus::ProtocolDecodeError => None,
        }
    }

    /// Code stored in `notifications.result_code`.
    pub fn code(self) -> i32 {
        self.to_byte()
            .map(i32::from)
            .unwrap_or(Self::PROTOCOL_DECODE_ERROR_CODE)
    }

    /// Inverse of [`GatewayStatus::code`].
    pub fn from_code(code: i32) -> Option<Self> {
        if code == Self::PROTOCOL_DECODE_ERROR_CODE {
            return Some(GatewayStatus::ProtocolDecodeError);
        }
        u8::try_from(code)
            .ok()
            .and_then(|byte| Self::from_byte(byte).ok())
    }

    pub fn is_success(self) -> bool {
        self == GatewayStatus::NoError
    }

    /// Whether resending the same notification can never succeed.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            GatewayStatus::MissingDeviceToken
                | GatewayStatus::MissingPayload
                | GatewayStatus::InvalidTokenSize
                | GatewayStatus::InvalidPayloadSize
                | GatewayStatus::InvalidToken
        )
    }
}

/// Notification frame written to the gateway.
///
/// Wire format:
/// ```text
/// [1: command=0x01][4: identifier][4: expiry][2: token_len][32: token][2: payload_len][N: payload]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFrame {
    /// Position of the notification within its batch.
    pub identifier: u32,
    /// Unix seconds after which the gateway may drop the push. 0 means none.
    pub expiry: u32,
    pub device_token: [u8; DEVICE_TOKEN_LEN],
    /// Serialized JSON body.
    pub payload: Vec<u8>,
}

impl NotificationFrame {
    /// Header size in bytes (command + identifier + expiry + token_len).
    const HEADER_SIZE: usize = 1 + 4 + 4 + 2;

    /// Build the frame for a stored notification.
    ///
    /// Returns the status the gateway would answer when the notification can
    /// never be encoded (bad token, oversize payload).
    pub fn from_notification(
        notification: &Notification,
        identifier: u32,
        max_payload_size: usize,
    ) -> Result<Self, GatewayStatus> {
        let token = notification.device_token.trim();
        if token.is_empty() {
            return Err(GatewayStatus::MissingDeviceToken);
        }

        let token_bytes = hex::decode(token).map_err(|_| GatewayStatus::InvalidToken)?;
        let device_token: [u8; DEVICE_TOKEN_LEN] = token_bytes
            .try_into()
            .map_err(|_| GatewayStatus::InvalidTokenSize)?;

        if notification.payload.is_null() {
            return Err(GatewayStatus::MissingPayload);
        }
        let payload =
            serde_json::to_vec(&notification.payload).map_err(|_| GatewayStatus::MissingPayload)?;
        if payload.len() > max_payload_size || payload.len() > u16::MAX as usize {
            return Err(GatewayStatus::InvalidPayloadSize);
        }

        let expiry = notification
            .expires_at
            .map(|at| u32::try_from(at.timestamp().max(0)).unwrap_or(u32::MAX))
            .unwrap_or(0);

        Ok(Self {
            identifier,
            expiry,
            device_token,
            payload,
        })
    }

    /// Encode the frame to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(Self::HEADER_SIZE + DEVICE_TOKEN_LEN + 2 + self.payload.len());

        buf.push(COMMAND_NOTIFICATION);
        buf.extend_from_slice(&self.identifier.to_be_bytes());
        buf.extend_from_slice(&self.expiry.to_be_bytes());
        buf.extend_from_slice(&(DEVICE_TOKEN_LEN as u16).to_be_bytes());
        buf.extend_from_slice(&self.device_token);
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);

        buf
    }

    /// Decode a frame, as the gateway would. Returns the frame and the bytes consumed.
    pub fn decode(data: &[u8]) -> CourierResult<(Self, usize)> {
        let fixed = Self::HEADER_SIZE + DEVICE_TOKEN_LEN + 2;
        if data.len() < fixed {
            return Err(CourierError::Protocol(format!(
                "NotificationFrame too short: {} bytes, need at least {}",
                data.len(),
                fixed
            )));
        }

        if data[0] != COMMAND_NOTIFICATION {
            return Err(CourierError::Protocol(format!(
                "Expected notification command {:#04x}, got {:#04x}",
                COMMAND_NOTIFICATION, data[0]
            )));
        }

        let identifier = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
        let expiry = u32::from_be_bytes([data[5], data[6], data[7], data[8]]);

        let token_len = u16::from_be_bytes([data[9], data[10]]) as usize;
        if token_len != DEVICE_TOKEN_LEN {
            return Err(CourierError::Protocol(format!(
                "Unexpected token length {}",
                token_len
            )));
        }
        let mut device_token = [0u8; DEVICE_TOKEN_LEN];
        device_token.copy_from_slice(&data[11..11 + DEVICE_TOKEN_LEN]);

        let payload_len = u16::from_be_bytes([data[fixed - 2], data[fixed - 1]]) as usize;
        let total = fixed + payload_len;
        if data.len() < total {
            return Err(CourierError::Protocol(format!(
                "NotificationFrame truncated: got {} bytes, expected {}",
                data.len(),
                total
            )));
        }

        Ok((
            Self {
                identifier,
                expiry,
                device_token,
                payload: data[fixed..total].to_vec(),
            },
            total,
        ))
    }
}

/// Error-response frame sent by the gateway before it drops the connection.
///
/// Wire format:
/// ```text
/// [1: command=0x08][1: status][4: identifier]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorFrame {
    pub status: GatewayStatus,
    /// Identifier of the notification that failed.
    pub identifier: u32,
}

impl ErrorFrame {
    pub fn new(status: GatewayStatus, identifier: u32) -> Self {
        Self { status, identifier }
    }

    /// Encode the frame to bytes.
    ///
    /// A local-only status is written as `UnknownError`.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(ERROR_FRAME_LEN);
        buf.push(COMMAND_ERROR_RESPONSE);
        buf.push(self.status.to_byte().unwrap_or(255));
        buf.extend_from_slice(&self.identifier.to_be_bytes());
        buf
    }

    /// Decode an error-response frame.
    pub fn decode(data: &[u8]) -> CourierResult<Self> {
        if data.len() != ERROR_FRAME_LEN {
            return Err(CourierError::Protocol(format!(
                "ErrorFrame has {} bytes, expected {}",
                data.len(),
                ERROR_FRAME_LEN
            )));
        }

        if data[0] != COMMAND_ERROR_RESPONSE {
            return Err(CourierError::Protocol(format!(
                "Expected error-response command {:#04x}, got {:#04x}",
                COMMAND_ERROR_RESPONSE, data[0]
            )));
        }

        let status = GatewayStatus::from_byte(data[1])?;
        let identifier = u32::from_be_bytes([data[2], data[3], data[4], data[5]]);

        Ok(Self { status, identifier })
    }
}
