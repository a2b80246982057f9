// libs/appointment-cell/src/services/fingerprint.rs
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::AppointmentError;
use crate::services::civil_time::{local_date_in_zone, parse_timezone};

const DERIVED_KEY_PREFIX: &str = "public-booking:";

/// Identity of "same patient, same service, same local day" at one clinic:
/// `clinicSlug|serviceId|YYYY-MM-DD|email`, email trimmed and lowercased.
pub fn booking_fingerprint(
    clinic_slug: &str,
    service_id: Uuid,
    slot_start: DateTime<Utc>,
    patient_email: &str,
    timezone: &str,
) -> Result<String, AppointmentError> {
    let tz = parse_timezone(timezone)?;
    let local_date = local_date_in_zone(slot_start, tz);

    Ok(format!(
        "{}|{}|{}|{}",
        clinic_slug,
        service_id,
        local_date.format("%Y-%m-%d"),
        patient_email.trim().to_lowercase()
    ))
}

/// Idempotency key used when the caller did not send one.
pub fn derive_idempotency_key(fingerprint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(fingerprint.as_bytes());
    format!("{}{}", DERIVED_KEY_PREFIX, URL_SAFE_NO_PAD.encode(hasher.finalize()))
}
