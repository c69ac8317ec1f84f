//! RSVP ticket and reference numbers.

use rand::distributions::{Distribution, Uniform};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Prefix on every What's On ticket.
pub const TICKET_PREFIX: &str = "WO";

/// Characters after the `#` in a reference number.
pub const REFERENCE_LEN: usize = 13;

const MAX_SEQUENCE: u32 = 999_999;
const REFERENCE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// `WO-<year>-<NNNNNN>` for the `sequence`-th RSVP of an event.
pub fn ticket_number(year: i32, sequence: u32) -> Result<String> {
    if sequence == 0 || sequence > MAX_SEQUENCE {
        return Err(Error::Validation(format!(
            "Ticket sequence {} out of range",
            sequence
        )));
    }
    Ok(format!("{}-{}-{:06}", TICKET_PREFIX, year, sequence))
}

/// `#` followed by 13 random uppercase alphanumerics.
pub fn reference_number() -> String {
    reference_number_with(&mut rand::thread_rng())
}

pub fn reference_number_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    let pick = Uniform::from(0..REFERENCE_ALPHABET.len());
    let mut reference = String::with_capacity(REFERENCE_LEN + 1);
    reference.push('#');
    for _ in 0..REFERENCE_LEN {
        reference.push(REFERENCE_ALPHABET[pick.sample(rng)] as char);
    }
    reference
}

/// Whether a string looks like something `reference_number` produced.
pub fn is_reference_number(s: &str) -> bool {
    s.strip_prefix('#').is_some_and(|rest| {
        rest.len() == REFERENCE_LEN && rest.bytes().all(|b| REFERENCE_ALPHABET.contains(&b))
    })
}

/// Payment state of an RSVP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    NotRequired,
    Pending,
    Paid,
    Refunded,
}

impl PaymentStatus {
    /// Starting status for a new RSVP.
    pub fn initial(event_is_paid: bool) -> Self {
        if event_is_paid {
            PaymentStatus::Pending
        } else {
            PaymentStatus::NotRequired
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentStatus::NotRequired => "not_required",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
        }
    }
}

/// Check a request for `requested` spots.
///
/// `available` is `None` for events with unlimited spots.
pub fn validate_spot_request(
    requested: u32,
    max_per_person: u32,
    available: Option<u32>,
) -> Result<()> {
    if requested == 0 {
        return Err(Error::Validation("At least one spot is required".to_string()));
    }
    if requested > max_per_person {
        return Err(Error::Validation(format!(
            "At most {} spots per person",
            max_per_person
        )));
    }
    if let Some(available) = available {
        if requested > available {
            return Err(Error::Conflict(format!(
                "Only {} spots remaining",
                available
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_ticket_number() {
        assert_eq!(ticket_number(2025, 1).unwrap(), "WO-2025-000001");
        assert_eq!(ticket_number(2025, 123_456).unwrap(), "WO-2025-123456");
        assert!(ticket_number(2025, 0).is_err());
        assert!(ticket_number(2025, 1_000_000).is_err());
    }

    #[test]
    fn test_reference_shape() {
        for _ in 0..50 {
            let reference = reference_number();
            assert_eq!(reference.len(), REFERENCE_LEN + 1);
            assert!(is_reference_number(&reference), "{}", reference);
        }
    }

    #[test]
    fn test_reference_seeded_is_deterministic() {
        let a = reference_number_with(&mut StdRng::seed_from_u64(7));
        let b = reference_number_with(&mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_is_reference_number() {
        assert!(is_reference_number("#ABCDEFGHIJ123"));
        assert!(!is_reference_number("ABCDEFGHIJ1234"));
        assert!(!is_reference_number("#abcdefghij123"));
        assert!(!is_reference_number("#ABC"));
    }

    #[test]
    fn test_payment_status() {
        assert_eq!(PaymentStatus::initial(true), PaymentStatus::Pending);
        assert_eq!(PaymentStatus::initial(false), PaymentStatus::NotRequired);
        assert_eq!(PaymentStatus::NotRequired.as_str(), "not_required");
    }

    #[test]
    fn test_spot_requests() {
        assert!(validate_spot_request(2, 4, Some(10)).is_ok());
        assert!(validate_spot_request(4, 4, None).is_ok());
        assert!(matches!(validate_spot_request(0, 4, None), Err(Error::Validation(_))));
        assert!(matches!(validate_spot_request(5, 4, None), Err(Error::Validation(_))));
        assert!(matches!(validate_spot_request(3, 4, Some(2)), Err(Error::Conflict(_))));
    }
}
