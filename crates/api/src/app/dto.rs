//! Request DTOs for the layout endpoints.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

/// City layout document as posted by the UI.
///
/// Only the shape is checked. Unknown fields are ignored and do not reach the
/// stored document, which is the re-serialized DTO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutDocument {
    #[serde(default)]
    pub id: Uuid,
    pub name: String,
    pub grid: Grid,
    #[serde(default)]
    pub buildings: Vec<Building>,
    /// 2d array of road types, kept verbatim.
    #[serde(default)]
    pub roads: Option<Box<RawValue>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Grid {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Building {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    pub location: Location,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Location {
    pub x: i32,
    pub y: i32,
}

impl LayoutDocument {
    /// Give the document a fresh id if it came without one.
    pub fn ensure_id(&mut self) -> Uuid {
        if self.id.is_nil() {
            self.id = Uuid::now_v7();
        }
        self.id
    }
}
