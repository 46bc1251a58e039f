use std::fmt;

use serde::{Deserialize, Serialize};

/// A ticket released into the pool by a vendor.
///
/// The id is `<vendor label>-<serial>`, where the serial is the pool's produced count at the
/// moment the ticket was accepted, so ids stay unique no matter how vendors interleave.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ticket {
    id: String,
    serial: usize,
}

impl Ticket {
    pub(crate) fn issue(vendor_label: &str, serial: usize) -> Self {
        Self {
            id: format!("{}-{}", vendor_label, serial),
            serial,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn serial(&self) -> usize {
        self.serial
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
