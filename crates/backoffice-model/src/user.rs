//! Users and their owned address
//!
//! `User` is the cached server record; `UserDraft` is the signup/edit form.
//! CPF, phone and CEP are held masked in the draft and canonical in the
//! record and on the wire.

use crate::entity::{fill_if_blank, Draft, Entity, PostalAddress, PostalLookupTarget};
use crate::error::ModelError;
use crate::id::RecordId;
use crate::mask::{canonicalize, Mask, CEP_MASK, CPF_MASK, PHONE_MASK};
use crate::validation::{ValidationError, ValidationErrors};
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Two-letter codes of the Brazilian federative units
pub const BRAZILIAN_STATES: [&str; 27] = [
    "AC", "AL", "AP", "AM", "BA", "CE", "DF", "ES", "GO", "MA", "MT", "MS", "MG", "PA", "PB", "PR",
    "PE", "PI", "RJ", "RN", "RS", "RO", "RR", "SC", "SP", "SE", "TO",
];

/// Birth dates are picked in Brasília time (UTC-3)
const BIRTH_OFFSET_SECS: i32 = 3 * 3600;

/// Postal address owned by a user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    /// Server id once persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    /// Postal code
    pub cep: String,
    /// Street name
    pub street: String,
    /// District / neighbourhood
    pub district: String,
    /// Building number
    pub number: String,
    /// City
    pub city: String,
    /// State code
    pub uf: String,
    /// Owning user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<RecordId>,
}

impl Address {
    /// True when the user left every address field empty
    #[must_use]
    pub fn is_blank(&self) -> bool {
        [
            &self.cep,
            &self.street,
            &self.district,
            &self.number,
            &self.city,
            &self.uf,
        ]
        .iter()
        .all(|v| v.trim().is_empty())
    }

    fn get(&self, field: AddressField) -> &str {
        match field {
            AddressField::Cep => &self.cep,
            AddressField::Street => &self.street,
            AddressField::District => &self.district,
            AddressField::Number => &self.number,
            AddressField::City => &self.city,
            AddressField::Uf => &self.uf,
        }
    }

    fn slot(&mut self, field: AddressField) -> &mut String {
        match field {
            AddressField::Cep => &mut self.cep,
            AddressField::Street => &mut self.street,
            AddressField::District => &mut self.district,
            AddressField::Number => &mut self.number,
            AddressField::City => &mut self.city,
            AddressField::Uf => &mut self.uf,
        }
    }
}

/// Back-office user record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Server id
    pub id: RecordId,
    /// Login e-mail
    pub email: String,
    /// Password
    pub password: String,
    /// Full name
    pub name: String,
    /// CPF, canonical digits
    pub cpf: String,
    /// Birth instant as epoch milliseconds, decimal string
    #[serde(default)]
    pub birth: String,
    /// Phone, canonical digits
    pub phone: String,
    /// Form of address ("Sr.", "Sra.", ...)
    pub pronoun: String,
    /// Whether the user can use the back office
    #[serde(default)]
    pub admin: bool,
    /// Avatar URL
    #[serde(default)]
    pub image: Option<String>,
    /// Linked Google account
    #[serde(default)]
    pub google_id: Option<String>,
    /// Google access token
    #[serde(default)]
    pub google_token: Option<String>,
    /// Postal address
    #[serde(default)]
    pub address: Option<Address>,
}

impl Entity for User {
    const NAMESPACE: &'static str = "user";
    type Draft = UserDraft;

    fn id(&self) -> RecordId {
        self.id
    }
}

/// Address sub-form fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressField {
    /// Postal code
    Cep,
    /// Street
    Street,
    /// District
    District,
    /// Building number
    Number,
    /// City
    City,
    /// State code
    Uf,
}

impl fmt::Display for AddressField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cep => "cep",
            Self::Street => "street",
            Self::District => "district",
            Self::Number => "number",
            Self::City => "city",
            Self::Uf => "uf",
        };
        f.write_str(name)
    }
}

/// Text fields of the user form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserField {
    /// Full name
    Name,
    /// CPF (masked)
    Cpf,
    /// E-mail
    Email,
    /// Phone (masked)
    Phone,
    /// Birth, epoch milliseconds
    Birth,
    /// Pronoun
    Pronoun,
    /// Password
    Password,
    /// Address sub-field
    Address(AddressField),
}

impl fmt::Display for UserField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name => f.write_str("name"),
            Self::Cpf => f.write_str("cpf"),
            Self::Email => f.write_str("email"),
            Self::Phone => f.write_str("phone"),
            Self::Birth => f.write_str("birth"),
            Self::Pronoun => f.write_str("pronoun"),
            Self::Password => f.write_str("password"),
            Self::Address(field) => write!(f, "address.{field}"),
        }
    }
}

/// Signup / edit form for a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDraft {
    /// Set when editing an existing user
    pub id: Option<RecordId>,
    /// Full name
    pub name: String,
    /// E-mail
    pub email: String,
    /// CPF, masked
    pub cpf: String,
    /// Phone, masked
    pub phone: String,
    /// Birth, epoch milliseconds
    pub birth: String,
    /// Pronoun
    pub pronoun: String,
    /// Password
    pub password: String,
    /// Admin flag
    pub admin: bool,
    /// Avatar URL
    pub image: Option<String>,
    /// Linked Google account
    pub google_id: Option<String>,
    /// Google access token
    pub google_token: Option<String>,
    /// Address with the CEP masked
    pub address: Option<Address>,
}

impl Default for UserDraft {
    fn default() -> Self {
        Self {
            id: None,
            name: String::new(),
            email: String::new(),
            cpf: String::new(),
            phone: String::new(),
            birth: String::new(),
            pronoun: String::new(),
            password: String::new(),
            admin: true,
            image: None,
            google_id: None,
            google_token: None,
            address: Some(Address::default()),
        }
    }
}

impl UserDraft {
    /// Birth as a calendar date in Brasília time
    #[must_use]
    pub fn birth_date(&self) -> Option<NaiveDate> {
        let millis: i64 = self.birth.trim().parse().ok()?;
        let utc = DateTime::from_timestamp_millis(millis)?;
        let offset = FixedOffset::west_opt(BIRTH_OFFSET_SECS)?;
        Some(utc.with_timezone(&offset).date_naive())
    }

    /// Store a picked date as midnight Brasília time
    pub fn set_birth_date(&mut self, date: Option<NaiveDate>) {
        let millis = date.and_then(|d| {
            let offset = FixedOffset::west_opt(BIRTH_OFFSET_SECS)?;
            let midnight = d.and_hms_opt(0, 0, 0)?;
            offset
                .from_local_datetime(&midnight)
                .single()
                .map(|dt| dt.timestamp_millis())
        });
        self.birth = millis.map(|m| m.to_string()).unwrap_or_default();
    }

    fn address_mut(&mut self) -> &mut Address {
        self.address.get_or_insert_with(Address::default)
    }
}

#[derive(Serialize)]
struct UserPayload<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<RecordId>,
    name: &'a str,
    email: &'a str,
    cpf: String,
    phone: String,
    birth: &'a str,
    pronoun: &'a str,
    password: &'a str,
    admin: bool,
    image: Option<&'a str>,
    google_id: Option<&'a str>,
    google_token: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<Address>,
}

fn email_shape() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("e-mail pattern compiles"))
}

impl Draft for UserDraft {
    type Entity = User;
    type Field = UserField;

    fn from_record(record: &User) -> Self {
        Self {
            id: Some(record.id),
            name: record.name.clone(),
            email: record.email.clone(),
            cpf: CPF_MASK.format(&record.cpf),
            phone: PHONE_MASK.format(&record.phone),
            birth: record.birth.clone(),
            pronoun: record.pronoun.clone(),
            password: record.password.clone(),
            admin: record.admin,
            image: record.image.clone(),
            google_id: record.google_id.clone(),
            google_token: record.google_token.clone(),
            address: record.address.as_ref().map(|a| Address {
                cep: CEP_MASK.format(&a.cep),
                ..a.clone()
            }),
        }
    }

    fn id(&self) -> Option<RecordId> {
        self.id
    }

    fn field(&self, field: UserField) -> &str {
        match field {
            UserField::Name => &self.name,
            UserField::Cpf => &self.cpf,
            UserField::Email => &self.email,
            UserField::Phone => &self.phone,
            UserField::Birth => &self.birth,
            UserField::Pronoun => &self.pronoun,
            UserField::Password => &self.password,
            UserField::Address(f) => self.address.as_ref().map_or("", |a| a.get(f)),
        }
    }

    fn set_field(&mut self, field: UserField, value: String) {
        match field {
            UserField::Name => self.name = value,
            UserField::Cpf => self.cpf = CPF_MASK.format(&value),
            UserField::Email => self.email = value,
            UserField::Phone => self.phone = PHONE_MASK.format(&value),
            UserField::Birth => self.birth = value,
            UserField::Pronoun => self.pronoun = value,
            UserField::Password => self.password = value,
            UserField::Address(AddressField::Cep) => {
                self.address_mut().cep = CEP_MASK.format(&value);
            }
            UserField::Address(AddressField::Uf) => {
                self.address_mut().uf = value.trim().to_uppercase();
            }
            UserField::Address(f) => *self.address_mut().slot(f) = value,
        }
    }

    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        errors.require("name", &self.name);
        errors.require("password", &self.password);
        errors.require("pronoun", &self.pronoun);

        if errors.require("cpf", &self.cpf) && !CPF_MASK.is_complete(&self.cpf) {
            errors.push(ValidationError::malformed("cpf", "expected 11 digits"));
        }
        if errors.require("phone", &self.phone) && !PHONE_MASK.is_complete(&self.phone) {
            errors.push(ValidationError::malformed("phone", "expected 10 or 11 digits"));
        }
        if errors.require("email", &self.email) && !email_shape().is_match(self.email.trim()) {
            errors.push(ValidationError::malformed("email", "not an e-mail address"));
        }
        if !self.birth.trim().is_empty() && self.birth.trim().parse::<i64>().is_err() {
            errors.push(ValidationError::malformed("birth", "expected epoch milliseconds"));
        }

        if let Some(address) = self.address.as_ref().filter(|a| !a.is_blank()) {
            if errors.require("address.cep", &address.cep) && !CEP_MASK.is_complete(&address.cep)
            {
                errors.push(ValidationError::malformed("address.cep", "expected 8 digits"));
            }
            for field in [
                AddressField::Street,
                AddressField::District,
                AddressField::City,
                AddressField::Uf,
            ] {
                if address.get(field).trim().is_empty() {
                    errors.push(ValidationError::unresolved(
                        UserField::Address(field).to_string(),
                    ));
                }
            }
            let uf = address.uf.trim();
            if !uf.is_empty() && !BRAZILIAN_STATES.contains(&uf) {
                errors.push(ValidationError::malformed("address.uf", "unknown state code"));
            }
        }

        errors.into_result()
    }

    fn to_wire(&self) -> Result<serde_json::Value, ModelError> {
        self.validate()?;

        let address = self
            .address
            .as_ref()
            .filter(|a| !a.is_blank())
            .map(|a| Address {
                cep: canonicalize(&a.cep),
                ..a.clone()
            });

        let payload = UserPayload {
            id: self.id,
            name: self.name.trim(),
            email: self.email.trim(),
            cpf: canonicalize(&self.cpf),
            phone: canonicalize(&self.phone),
            birth: self.birth.trim(),
            pronoun: &self.pronoun,
            password: &self.password,
            admin: self.admin,
            image: self.image.as_deref(),
            google_id: self.google_id.as_deref(),
            google_token: self.google_token.as_deref(),
            address,
        };

        Ok(serde_json::to_value(payload)?)
    }
}

impl PostalLookupTarget for UserDraft {
    const POSTAL_CODE: UserField = UserField::Address(AddressField::Cep);
    const FOCUS_AFTER_LOOKUP: UserField = UserField::Address(AddressField::Number);

    fn merge_lookup(&mut self, found: &PostalAddress) -> Vec<UserField> {
        let address = self.address_mut();
        let mut written = Vec::new();

        let candidates = [
            (AddressField::Street, found.street.as_ref()),
            (AddressField::District, found.district.as_ref()),
            (AddressField::City, found.city.as_ref()),
            (AddressField::Uf, found.uf.as_ref()),
        ];
        for (field, value) in candidates {
            if fill_if_blank(address.slot(field), value) {
                written.push(UserField::Address(field));
            }
        }

        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn filled_draft() -> UserDraft {
        let mut draft = UserDraft::default();
        draft.set_field(UserField::Name, "Ana Souza".into());
        draft.set_field(UserField::Cpf, "123.456.789-00".into());
        draft.set_field(UserField::Email, "ana@example.com".into());
        draft.set_field(UserField::Phone, "41987654321".into());
        draft.set_field(UserField::Pronoun, "Sra.".into());
        draft.set_field(UserField::Password, "hunter2".into());
        draft
    }

    fn stored_user() -> User {
        User {
            id: RecordId(5),
            email: "ana@example.com".into(),
            password: "hunter2".into(),
            name: "Ana Souza".into(),
            cpf: "12345678900".into(),
            birth: String::new(),
            phone: "41987654321".into(),
            pronoun: "Sra.".into(),
            admin: false,
            image: None,
            google_id: None,
            google_token: None,
            address: Some(Address {
                id: Some(RecordId(11)),
                cep: "80010000".into(),
                street: "Rua XV de Novembro".into(),
                district: "Centro".into(),
                number: "100".into(),
                city: "Curitiba".into(),
                uf: "PR".into(),
                user_id: Some(RecordId(5)),
            }),
        }
    }

    #[test]
    fn blank_draft_matches_new_user_defaults() {
        let draft = UserDraft::default();
        assert!(draft.admin);
        assert!(draft.id.is_none());
        assert!(draft.address.as_ref().is_some_and(Address::is_blank));
    }

    #[test]
    fn draft_from_record_masks_fields() {
        let draft = UserDraft::from_record(&stored_user());
        assert_eq!(draft.id, Some(RecordId(5)));
        assert_eq!(draft.cpf, "123.456.789-00");
        assert_eq!(draft.phone, "(41) 9 8765-4321");
        assert_eq!(draft.field(UserField::Address(AddressField::Cep)), "80.010-000");
    }

    #[test]
    fn set_field_applies_masks() {
        let mut draft = UserDraft::default();
        draft.set_field(UserField::Address(AddressField::Cep), "80010000".into());
        draft.set_field(UserField::Address(AddressField::Uf), " pr ".into());
        assert_eq!(draft.field(UserField::Address(AddressField::Cep)), "80.010-000");
        assert_eq!(draft.field(UserField::Address(AddressField::Uf)), "PR");
    }

    #[test]
    fn missing_required_fields_are_all_reported() {
        let errors = UserDraft::default().validate().unwrap_err();
        for field in ["name", "cpf", "email", "phone", "password", "pronoun"] {
            assert!(errors.for_field(field).is_some(), "{field} should be required");
        }
        assert!(errors.for_field("address.cep").is_none());
    }

    #[test]
    fn partial_address_requires_resolved_fields() {
        let mut draft = filled_draft();
        draft.set_field(UserField::Address(AddressField::Cep), "80010000".into());

        let errors = draft.validate().unwrap_err();
        assert!(errors.for_field("address.street").is_some());
        assert!(errors.for_field("address.cep").is_none());
    }

    #[test]
    fn wire_payload_is_canonical() {
        let value = filled_draft().to_wire().unwrap();
        assert_eq!(value["cpf"], json!("12345678900"));
        assert_eq!(value["phone"], json!("41987654321"));
        assert!(value.get("id").is_none());
        assert!(value.get("address").is_none(), "blank address is omitted");
    }

    #[test]
    fn wire_payload_keeps_id_and_strips_cep() {
        let draft = UserDraft::from_record(&stored_user());
        let value = draft.to_wire().unwrap();
        assert_eq!(value["id"], json!(5));
        assert_eq!(value["address"]["cep"], json!("80010000"));
    }

    #[test]
    fn merge_fills_only_blank_fields() {
        let mut draft = filled_draft();
        draft.set_field(UserField::Address(AddressField::Street), "Rua X".into());

        let written = draft.merge_lookup(&PostalAddress {
            street: Some("Rua Y".into()),
            district: Some("Centro".into()),
            city: Some("Curitiba".into()),
            uf: Some("PR".into()),
        });

        assert_eq!(draft.field(UserField::Address(AddressField::Street)), "Rua X");
        assert_eq!(draft.field(UserField::Address(AddressField::District)), "Centro");
        assert!(!written.contains(&UserField::Address(AddressField::Street)));
        assert_eq!(written.len(), 3);
    }

    #[test]
    fn birth_date_round_trips_in_brasilia_time() {
        let mut draft = UserDraft::default();
        let date = NaiveDate::from_ymd_opt(1990, 5, 17).unwrap();
        draft.set_birth_date(Some(date));
        assert_eq!(draft.birth_date(), Some(date));

        draft.set_birth_date(None);
        assert!(draft.birth.is_empty());
    }

    #[test]
    fn field_names_follow_form_paths() {
        assert_eq!(UserField::Address(AddressField::Cep).to_string(), "address.cep");
        assert_eq!(UserField::Pronoun.to_string(), "pronoun");
    }
}
