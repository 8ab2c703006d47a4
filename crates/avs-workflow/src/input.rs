//! # Step Input Parsing
//!
//! Turns the provider-agnostic JSON payload of a step submission into a
//! typed [`StepInput`]. Everything here runs before a reservation is taken,
//! so malformed input never costs an attempt.
//!
//! | Step | Payload |
//! |------|---------|
//! | `phone_otp`, `email_otp` | `{destination}` to send, `{transaction_id, code}` to verify |
//! | `document` | `{front_image, back_image?}` |
//! | `selfie_liveness` | `{selfie_image, reference_image?}` |
//! | `face_match` | `{selfie_image, reference_image}` |
//! | `registry_cso`, `registry_ntra` | `{extracted_identity_fields?}` |
//! | `headshot` | `{source_image, style_params?}` |

use serde_json::{Map, Value};
use thiserror::Error;

use avs_core::{StepId, TransactionId};
use avs_gateway::{BiometricCheck, DocumentSubmission, HeadshotRequest, SelfieSubmission};

/// Upper bound on an encoded image field, in bytes.
pub const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Upper bound on short text fields (destinations, codes).
pub const MAX_TEXT_BYTES: usize = 320;

/// Upper bound on the serialized identity fields or style parameters.
pub const MAX_OBJECT_BYTES: usize = 64 * 1024;

/// Payload rejected before any provider call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("provider_input must be a JSON object")]
    NotAnObject,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("field `{field}` exceeds {max} bytes")]
    TooLarge { field: &'static str, max: usize },
}

/// Typed payload of one step submission.
#[derive(Debug, Clone, PartialEq)]
pub enum StepInput {
    /// Deliver a one-time code.
    OtpSend { destination: String },
    /// Check a delivered code.
    OtpVerify {
        transaction_id: TransactionId,
        code: String,
    },
    Document(DocumentSubmission),
    Selfie(SelfieSubmission),
    /// Registry validation. `None` means "use the fields extracted by the
    /// document step".
    Registry {
        identity_fields: Option<Map<String, Value>>,
    },
    Headshot(HeadshotRequest),
}

impl StepInput {
    /// Parse and validate the payload for `step`.
    pub fn parse(step: StepId, payload: &Value) -> Result<Self, InputError> {
        let fields = payload.as_object().ok_or(InputError::NotAnObject)?;
        match step {
            StepId::PhoneOtp | StepId::EmailOtp => parse_otp(step, fields),
            StepId::Document => Ok(Self::Document(DocumentSubmission {
                front_image: image(fields, "front_image")?,
                back_image: optional_image(fields, "back_image")?,
            })),
            StepId::SelfieLiveness => Ok(Self::Selfie(SelfieSubmission {
                check: BiometricCheck::Liveness,
                selfie_image: image(fields, "selfie_image")?,
                reference_image: optional_image(fields, "reference_image")?,
            })),
            StepId::FaceMatch => Ok(Self::Selfie(SelfieSubmission {
                check: BiometricCheck::FaceMatch,
                selfie_image: image(fields, "selfie_image")?,
                reference_image: Some(image(fields, "reference_image")?),
            })),
            StepId::RegistryCso | StepId::RegistryNtra => Ok(Self::Registry {
                identity_fields: optional_object(fields, "extracted_identity_fields")?,
            }),
            StepId::Headshot => Ok(Self::Headshot(HeadshotRequest {
                source_image: image(fields, "source_image")?,
                style_params: optional_object(fields, "style_params")?
                    .map(Value::Object)
                    .unwrap_or(Value::Null),
            })),
        }
    }
}

fn parse_otp(step: StepId, fields: &Map<String, Value>) -> Result<StepInput, InputError> {
    if fields.contains_key("code") || fields.contains_key("transaction_id") {
        let transaction_id = text(fields, "transaction_id", MAX_TEXT_BYTES)?;
        let transaction_id =
            TransactionId::new(transaction_id).map_err(|e| InputError::InvalidField {
                field: "transaction_id",
                reason: e.to_string(),
            })?;
        let code = text(fields, "code", MAX_TEXT_BYTES)?;
        if !(4..=8).contains(&code.len()) || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InputError::InvalidField {
                field: "code",
                reason: "must be 4 to 8 digits".into(),
            });
        }
        return Ok(StepInput::OtpVerify {
            transaction_id,
            code,
        });
    }

    let destination = text(fields, "destination", MAX_TEXT_BYTES)?;
    let plausible = match step {
        StepId::EmailOtp => destination
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.')),
        _ => {
            let digits = destination.strip_prefix('+').unwrap_or(&destination);
            (6..=15).contains(&digits.len()) && digits.bytes().all(|b| b.is_ascii_digit())
        }
    };
    if !plausible {
        let reason = match step {
            StepId::EmailOtp => "must be an email address",
            _ => "must be a phone number of 6 to 15 digits",
        };
        return Err(InputError::InvalidField {
            field: "destination",
            reason: reason.into(),
        });
    }
    Ok(StepInput::OtpSend { destination })
}

fn text(fields: &Map<String, Value>, field: &'static str, max: usize) -> Result<String, InputError> {
    let value = fields.get(field).ok_or(InputError::MissingField(field))?;
    let s = value.as_str().ok_or_else(|| InputError::InvalidField {
        field,
        reason: "must be a string".into(),
    })?;
    let s = s.trim();
    if s.is_empty() {
        return Err(InputError::InvalidField {
            field,
            reason: "must not be empty".into(),
        });
    }
    if s.len() > max {
        return Err(InputError::TooLarge { field, max });
    }
    Ok(s.to_string())
}

fn image(fields: &Map<String, Value>, field: &'static str) -> Result<String, InputError> {
    text(fields, field, MAX_IMAGE_BYTES)
}

fn optional_image(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, InputError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => image(fields, field).map(Some),
    }
}

fn optional_object(
    fields: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<Map<String, Value>>, InputError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => {
            if Value::Object(map.clone()).to_string().len() > MAX_OBJECT_BYTES {
                return Err(InputError::TooLarge {
                    field,
                    max: MAX_OBJECT_BYTES,
                });
            }
            Ok(Some(map.clone()))
        }
        Some(_) => Err(InputError::InvalidField {
            field,
            reason: "must be an object".into(),
        }),
    }
}
