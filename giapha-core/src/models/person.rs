use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One check-in memory: an image reference and the day it was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckIn {
    pub image: String,
    pub date: String,
}

/// A person record as stored in a branch partition.
///
/// Relationship fields hold identifiers only. Any of them may dangle; readers
/// resolve them against the current snapshot and skip what is missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: String,
    pub name: String,
    pub generation: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub death_date: Option<String>,
    /// Birth-order label such as "eldest son".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facebook: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zalo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub other_contact: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub check_ins: Vec<CheckIn>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub father_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mother_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spouse_id: Option<String>,
    /// Spouse name when the spouse has no record of their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spouse_name: Option<String>,
    #[serde(default)]
    pub child_ids: Vec<String>,
    #[serde(default)]
    pub sibling_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineage: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Person {
    /// A record with only the mandatory fields populated.
    pub fn new(id: impl Into<String>, name: impl Into<String>, generation: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            generation,
            birth_date: None,
            death_date: None,
            position: None,
            address: None,
            phone: None,
            facebook: None,
            zalo: None,
            other_contact: None,
            notes: None,
            photo: None,
            check_ins: Vec::new(),
            father_id: None,
            mother_id: None,
            spouse_id: None,
            spouse_name: None,
            child_ids: Vec::new(),
            sibling_ids: Vec::new(),
            lineage: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Record body as a JSON object without the store-assigned timestamps.
    pub fn to_document(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut doc = match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        doc.remove("createdAt");
        doc.remove("updatedAt");
        doc
    }

    /// Appends `id` to the child list unless already present.
    pub fn push_child(&mut self, id: &str) -> bool {
        push_unique(&mut self.child_ids, id)
    }

    /// Appends `id` to the sibling list unless already present.
    pub fn push_sibling(&mut self, id: &str) -> bool {
        push_unique(&mut self.sibling_ids, id)
    }

    /// Appends a check-in, dropping the oldest entries beyond `limit`.
    pub fn push_check_in(&mut self, entry: CheckIn, limit: usize) {
        self.check_ins.push(entry);
        if self.check_ins.len() > limit {
            let excess = self.check_ins.len() - limit;
            self.check_ins.drain(..excess);
        }
    }
}

fn push_unique(list: &mut Vec<String>, id: &str) -> bool {
    if list.iter().any(|existing| existing == id) {
        return false;
    }
    list.push(id.to_string());
    true
}

/// Optional fields that can be removed from a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PersonField {
    BirthDate,
    DeathDate,
    Position,
    Address,
    Phone,
    Facebook,
    Zalo,
    OtherContact,
    Notes,
    Photo,
    CheckIns,
    MotherId,
    SpouseId,
    SpouseName,
    Lineage,
}

impl PersonField {
    /// Document key of the field.
    pub fn key(self) -> &'static str {
        match self {
            Self::BirthDate => "birthDate",
            Self::DeathDate => "deathDate",
            Self::Position => "position",
            Self::Address => "address",
            Self::Phone => "phone",
            Self::Facebook => "facebook",
            Self::Zalo => "zalo",
            Self::OtherContact => "otherContact",
            Self::Notes => "notes",
            Self::Photo => "photo",
            Self::CheckIns => "checkIns",
            Self::MotherId => "motherId",
            Self::SpouseId => "spouseId",
            Self::SpouseName => "spouseName",
            Self::Lineage => "lineage",
        }
    }

    pub fn clear(self, person: &mut Person) {
        match self {
            Self::BirthDate => person.birth_date = None,
            Self::DeathDate => person.death_date = None,
            Self::Position => person.position = None,
            Self::Address => person.address = None,
            Self::Phone => person.phone = None,
            Self::Facebook => person.facebook = None,
            Self::Zalo => person.zalo = None,
            Self::OtherContact => person.other_contact = None,
            Self::Notes => person.notes = None,
            Self::Photo => person.photo = None,
            Self::CheckIns => person.check_ins.clear(),
            Self::MotherId => person.mother_id = None,
            Self::SpouseId => person.spouse_id = None,
            Self::SpouseName => person.spouse_name = None,
            Self::Lineage => person.lineage = None,
        }
    }
}
