//! Shipment quantity validation.
//!
//! A shipment is valid when the text is a non-empty base-10 integer `x`
//! with `0 <= x < 2147483647`. Nothing is sent for invalid input.

/// Exclusive upper bound of a shipment quantity.
pub const SHIPMENT_UPPER_BOUND: i64 = 2_147_483_647;

/// Whether `text` is an acceptable shipment quantity.
pub fn is_valid_shipment(text: &str) -> bool {
    parse_shipment(text).is_some()
}

fn parse_shipment(text: &str) -> Option<i32> {
    let value = text.parse::<i64>().ok()?;
    if !(0..SHIPMENT_UPPER_BOUND).contains(&value) {
        return None;
    }
    i32::try_from(value).ok()
}

/// Draft input of the shipment field.
///
/// Validity is recomputed on every edit. Submitting a valid draft yields the
/// quantity and resets the draft; an invalid draft is left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShipmentDraft {
    value: String,
    valid: bool,
}

impl ShipmentDraft {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the draft text. Returns the new validity.
    pub fn input(&mut self, text: impl Into<String>) -> bool {
        self.value = text.into();
        self.valid = is_valid_shipment(&self.value);
        self.valid
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The quantity the draft would submit.
    pub fn quantity(&self) -> Option<i32> {
        if self.valid {
            parse_shipment(&self.value)
        } else {
            None
        }
    }

    /// Take the quantity for submission, resetting the draft.
    pub fn submit(&mut self) -> Option<i32> {
        let quantity = self.quantity()?;
        *self = Self::default();
        Some(quantity)
    }
}
