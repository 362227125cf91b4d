//! Records the application is authorized to act on, and which one is current.
use serde::{Deserialize, Serialize};

use crate::xml::{self, XmlNode};

/// Authorization status of a record that needs nothing more from the user.
pub const NO_ACTION_REQUIRED: &str = "NoActionRequired";

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("record xml is not well formed: {0}")]
    Xml(#[from] xml::Error),
    #[error("expected a <record> element, found <{0}>")]
    NotARecord(String),
    #[error("record has no id")]
    MissingId,
    #[error("record {record_id} of person {person_id} is not in the authorized set")]
    UnknownRecord { person_id: String, record_id: String },
}

/// Summary of one authorized record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// The `<record>` element as returned by the service.
    pub xml: String,
    pub person_id: String,
    pub person_name: String,
    pub record_id: String,
    pub record_name: String,
    /// The `app-record-auth-action` attribute.
    pub auth_status: String,
}

impl Record {
    /// Builds a summary from a `<record>` element.
    pub fn from_xml(xml: &str, person_id: &str, person_name: &str) -> Result<Self, Error> {
        Self::from_node(&xml::parse(xml)?, person_id, person_name)
    }

    pub(crate) fn from_node(node: &XmlNode, person_id: &str, person_name: &str) -> Result<Self, Error> {
        if node.local_name() != "record" {
            return Err(Error::NotARecord(node.name().to_string()));
        }
        let record_id = node
            .attr_value("id")
            .filter(|id| !id.is_empty())
            .ok_or(Error::MissingId)?;
        let record_name = match node.text() {
            "" => node.attr_value("display-name").unwrap_or_default(),
            text => text,
        };
        Ok(Self {
            xml: node.outer_xml().to_string(),
            person_id: person_id.to_string(),
            person_name: person_name.to_string(),
            record_id: record_id.to_string(),
            record_name: record_name.to_string(),
            auth_status: node
                .attr_value("app-record-auth-action")
                .unwrap_or_default()
                .to_string(),
        })
    }

    /// Whether the application can use this record without further authorization.
    pub fn is_valid(&self) -> bool {
        self.auth_status == NO_ACTION_REQUIRED
    }

    pub fn key(&self) -> RecordKey {
        RecordKey {
            person_id: self.person_id.clone(),
            record_id: self.record_id.clone(),
        }
    }
}

/// Identifies a record across refreshes of the record set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub person_id: String,
    pub record_id: String,
}

/// Reads the `person-info` elements of a `GetAuthorizedPeople` answer.
///
/// Malformed `<record>` elements are skipped.
pub fn records_from_people(info: &XmlNode) -> Vec<Record> {
    let people = info
        .select_single_node("response-results")
        .map(|results| results.select_nodes("person-info"))
        .filter(|people| !people.is_empty())
        .unwrap_or_else(|| info.select_nodes("person-info"));

    people
        .iter()
        .flat_map(|person| {
            let person_id = person.child_text("person-id").unwrap_or_default();
            let person_name = person.child_text("name").unwrap_or_default();
            person.select_nodes("record").iter().filter_map(move |node| {
                match Record::from_node(node, person_id, person_name) {
                    Ok(record) => Some(record),
                    Err(error) => {
                        tracing::warn!("skipping record of person {person_id}: {error}");
                        None
                    }
                }
            })
        })
        .collect()
}

/// The authorized record set and the current selection.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    records: Vec<Record>,
    current: Option<RecordKey>,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that will prefer `current` once records arrive.
    pub fn with_current(current: Option<RecordKey>) -> Self {
        Self {
            records: Vec::new(),
            current,
        }
    }

    /// Replaces the record set.
    ///
    /// The current selection survives if it is still present; otherwise the first valid record
    /// becomes current, or nothing does.
    pub fn set_records(&mut self, records: Vec<Record>) {
        self.records = records;
        let still_present = self
            .current
            .as_ref()
            .is_some_and(|key| self.position(key).is_some());
        if !still_present {
            self.current = self.records.iter().find(|r| r.is_valid()).map(Record::key);
        }
    }

    /// Switches to `record`, which must be part of the set.
    pub fn set_current(&mut self, record: &Record) -> Result<(), Error> {
        let key = record.key();
        if self.position(&key).is_none() {
            return Err(Error::UnknownRecord {
                person_id: key.person_id,
                record_id: key.record_id,
            });
        }
        self.current = Some(key);
        Ok(())
    }

    pub fn current(&self) -> Option<&Record> {
        self.current
            .as_ref()
            .and_then(|key| self.position(key))
            .map(|index| &self.records[index])
    }

    /// The selected key, even while the record set is empty.
    pub fn current_key(&self) -> Option<&RecordKey> {
        self.current.as_ref()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.current = None;
    }

    fn position(&self, key: &RecordKey) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.person_id == key.person_id && r.record_id == key.record_id)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(person_id: &str, record_id: &str, status: &str) -> Record {
        Record::from_xml(
            &format!(r#"<record id="{record_id}" app-record-auth-action="{status}">{record_id} name</record>"#),
            person_id,
            "Person",
        )
        .unwrap()
    }

    #[test]
    fn record_from_xml() {
        let xml = r#"<record id="r-1" display-name="Jane D" app-record-auth-action="NoActionRequired">Jane</record>"#;
        let record = Record::from_xml(xml, "p-1", "Jane Doe").unwrap();
        assert_eq!(record.xml, xml);
        assert_eq!(record.record_id, "r-1");
        assert_eq!(record.record_name, "Jane");
        assert_eq!(record.person_name, "Jane Doe");
        assert!(record.is_valid());

        let unnamed = Record::from_xml(
            r#"<record id="r-2" display-name="Junior" app-record-auth-action="AuthorizationRequired"/>"#,
            "p-1",
            "Jane Doe",
        )
        .unwrap();
        assert_eq!(unnamed.record_name, "Junior");
        assert!(!unnamed.is_valid());
    }

    #[test]
    fn record_from_bad_xml() {
        assert!(matches!(
            Record::from_xml("<record id=", "p", "n"),
            Err(Error::Xml(_))
        ));
        assert!(matches!(
            Record::from_xml("<person/>", "p", "n"),
            Err(Error::NotARecord(_))
        ));
        assert!(matches!(
            Record::from_xml("<record>x</record>", "p", "n"),
            Err(Error::MissingId)
        ));
    }

    #[test]
    fn people_response() {
        let info = xml::parse_fragment(concat!(
            "<response-results><person-info><person-id>p-1</person-id><name>Jane</name>",
            r#"<record id="r-1" app-record-auth-action="NoActionRequired">Jane</record>"#,
            r#"<record>broken</record>"#,
            "</person-info><person-info><person-id>p-2</person-id><name>John</name>",
            r#"<record id="r-9" app-record-auth-action="NoActionRequired">John</record>"#,
            "</person-info></response-results>"
        ))
        .unwrap();
        let records = records_from_people(&info);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].person_id, "p-1");
        assert_eq!(records[1].person_name, "John");
    }

    #[test]
    fn first_valid_record_becomes_current() {
        let mut store = RecordStore::new();
        store.set_records(vec![
            record("p", "a", "AuthorizationRequired"),
            record("p", "b", NO_ACTION_REQUIRED),
            record("p", "c", NO_ACTION_REQUIRED),
        ]);
        assert_eq!(store.current().unwrap().record_id, "b");
    }

    #[test]
    fn selection_survives_refresh_while_present() {
        let mut store = RecordStore::new();
        let records = vec![record("p", "a", NO_ACTION_REQUIRED), record("p", "b", NO_ACTION_REQUIRED)];
        store.set_records(records.clone());
        store.set_current(&records[1]).unwrap();

        store.set_records(records.clone());
        assert_eq!(store.current().unwrap().record_id, "b");

        store.set_records(vec![record("p", "a", NO_ACTION_REQUIRED)]);
        assert_eq!(store.current().unwrap().record_id, "a");
    }

    #[test]
    fn no_valid_record_leaves_current_unset() {
        let mut store = RecordStore::new();
        store.set_records(vec![record("p", "a", "AuthorizationRequired")]);
        assert!(store.current().is_none());
        assert!(store.current_key().is_none());
    }

    #[test]
    fn preferred_selection_from_a_previous_run() {
        let mut store = RecordStore::with_current(Some(RecordKey {
            person_id: "p".into(),
            record_id: "b".into(),
        }));
        assert!(store.current().is_none());
        store.set_records(vec![record("p", "a", NO_ACTION_REQUIRED), record("p", "b", NO_ACTION_REQUIRED)]);
        assert_eq!(store.current().unwrap().record_id, "b");
    }

    #[test]
    fn unknown_record_cannot_be_selected() {
        let mut store = RecordStore::new();
        store.set_records(vec![record("p", "a", NO_ACTION_REQUIRED)]);
        let stranger = record("q", "z", NO_ACTION_REQUIRED);
        assert!(matches!(
            store.set_current(&stranger),
            Err(Error::UnknownRecord { .. })
        ));
        assert_eq!(store.current().unwrap().record_id, "a");
    }
}
