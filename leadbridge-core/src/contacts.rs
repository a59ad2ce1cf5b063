//! Aggregated contact collection with selection tracking.
//!
//! Remote contacts come from the contact provider and are replaced wholesale
//! on every refresh. Imported contacts are added locally, persisted in the
//! credential store, and stay until explicitly cleared. The selection is a
//! set of ids; ids that no longer exist are ignored rather than rejected.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

use crate::error::LeadbridgeError;
use crate::http::{ApiClient, ApiRequest};
use crate::model::{Contact, opt_string_or_number};
use crate::store::CredentialStore;

/// Remote contact as the backend returns it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteContactWire {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    id: Option<String>,
    #[serde(default)]
    resource_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default, alias = "phone")]
    phone_number: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// Contacts from every origin plus the current selection.
#[derive(Debug)]
pub struct ContactAggregator {
    store: CredentialStore,
    remote: Vec<Contact>,
    imported: Vec<Contact>,
    selection: HashSet<String>,
}

impl ContactAggregator {
    /// Create an aggregator, restoring imported contacts saved earlier.
    pub fn load(store: CredentialStore) -> Result<Self, LeadbridgeError> {
        let saved = store.imported_contacts()?;
        let mut aggregator = Self {
            store,
            remote: Vec::new(),
            imported: Vec::with_capacity(saved.len()),
            selection: HashSet::new(),
        };
        for contact in saved {
            aggregator.insert_imported(contact);
        }
        tracing::debug!("Restored {} imported contacts", aggregator.imported.len());
        Ok(aggregator)
    }

    /// Every contact, remote first, then imported in insertion order.
    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.remote.iter().chain(self.imported.iter())
    }

    pub fn remote(&self) -> &[Contact] {
        &self.remote
    }

    pub fn imported(&self) -> &[Contact] {
        &self.imported
    }

    pub fn get(&self, id: &str) -> Option<&Contact> {
        self.contacts().find(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.remote.len() + self.imported.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Replace the remote subset.
    ///
    /// Imported contacts are untouched, and selected ids that still exist
    /// afterwards stay selected. Duplicate ids within the batch keep the
    /// first occurrence.
    pub fn refresh_remote(&mut self, contacts: Vec<Contact>) {
        let mut seen = HashSet::new();
        let mut remote = Vec::with_capacity(contacts.len());
        for contact in contacts {
            if seen.insert(contact.id.clone()) {
                remote.push(contact);
            } else {
                tracing::warn!("Dropping duplicate remote contact {}", contact.id);
            }
        }
        self.remote = remote;

        // Imported ids must never shadow a remote one.
        let imported = std::mem::take(&mut self.imported);
        for contact in imported {
            self.insert_imported(contact);
        }
        tracing::debug!("Remote contacts replaced, {} now loaded", self.remote.len());
    }

    /// Fetch remote contacts from the backend and replace the remote subset.
    pub async fn fetch_remote(
        &mut self,
        api: &ApiClient,
        path: &str,
    ) -> Result<usize, LeadbridgeError> {
        let body = api.execute(ApiRequest::get(path)).await?;
        let contacts = parse_remote_contacts(body)?;
        let count = contacts.len();
        self.refresh_remote(contacts);
        tracing::info!("Fetched {} remote contacts", count);
        Ok(count)
    }

    /// Drop every remote contact.
    pub fn clear_remote(&mut self) {
        self.remote.clear();
    }

    /// Import one phone number per line.
    ///
    /// Lines are trimmed and empty lines skipped. Every remaining line must
    /// consist of ASCII digits only; a single bad line rejects the whole
    /// import. Returns the newly added contacts.
    pub fn import_from_lines<I, S>(&mut self, lines: I) -> Result<Vec<Contact>, LeadbridgeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut phones = Vec::new();
        for (index, line) in lines.into_iter().enumerate() {
            let phone = line.as_ref().trim();
            if phone.is_empty() {
                continue;
            }
            if !phone.bytes().all(|b| b.is_ascii_digit()) {
                return Err(LeadbridgeError::validation(format!(
                    "line {}: {:?} is not a phone number; each line must contain digits only",
                    index + 1,
                    phone
                )));
            }
            phones.push(phone.to_string());
        }
        if phones.is_empty() {
            return Err(LeadbridgeError::validation(
                "no phone numbers to import; each line must contain digits only",
            ));
        }

        let mut imported = self.imported.clone();
        let mut added = Vec::with_capacity(phones.len());
        for phone in phones {
            let contact = Contact::imported(format!("Imported {}", phone), phone);
            let id = unique_id(contact.id.clone(), |id| {
                self.remote.iter().chain(imported.iter()).any(|c| c.id == id)
            });
            let contact = Contact { id, ..contact };
            imported.push(contact.clone());
            added.push(contact);
        }

        self.store.save_imported_contacts(&imported)?;
        self.imported = imported;
        tracing::info!("Imported {} contacts", added.len());
        Ok(added)
    }

    /// Remove every imported contact, here and in the store.
    pub fn clear_imported(&mut self) -> Result<(), LeadbridgeError> {
        self.store.clear_imported_contacts()?;
        self.imported.clear();
        Ok(())
    }

    /// Append an imported contact, renaming it if its id is taken.
    fn insert_imported(&mut self, mut contact: Contact) {
        if self.contains(&contact.id) {
            let renamed = unique_id(contact.id.clone(), |id| self.contains(id));
            tracing::debug!("Imported contact {} renamed to {}", contact.id, renamed);
            contact.id = renamed;
        }
        self.imported.push(contact);
    }

    /// Flip selection of `id`. Unknown ids are ignored. Returns whether the
    /// id is selected afterwards.
    pub fn toggle_selection(&mut self, id: &str) -> bool {
        if !self.contains(id) {
            self.selection.remove(id);
            return false;
        }
        if !self.selection.remove(id) {
            self.selection.insert(id.to_string());
            return true;
        }
        false
    }

    /// Select `id` if present. Selecting twice is a no-op.
    pub fn select(&mut self, id: &str) -> bool {
        if self.contains(id) {
            self.selection.insert(id.to_string());
            true
        } else {
            false
        }
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selection.contains(id) && self.contains(id)
    }

    /// Selected ids that still exist, in collection order.
    pub fn selected_ids(&self) -> Vec<String> {
        self.contacts()
            .filter(|c| self.selection.contains(&c.id))
            .map(|c| c.id.clone())
            .collect()
    }

    /// Contacts a sync should send.
    ///
    /// The selected contacts when anything is selected, otherwise every
    /// contact. An empty selection means "sync everything".
    pub fn effective_sync_set(&self) -> Vec<Contact> {
        let selected: Vec<Contact> = self
            .contacts()
            .filter(|c| self.selection.contains(&c.id))
            .cloned()
            .collect();
        if selected.is_empty() {
            self.contacts().cloned().collect()
        } else {
            selected
        }
    }
}

/// First of `base`, `base-2`, `base-3`, ... not reported as taken.
fn unique_id(base: String, taken: impl Fn(&str) -> bool) -> String {
    if !taken(&base) {
        return base;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Decode the contact list response: `{ contacts: [...] }` or a bare array.
pub(crate) fn parse_remote_contacts(body: Value) -> Result<Vec<Contact>, LeadbridgeError> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        let message = body
            .get("message")
            .or_else(|| body.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("failed to fetch contacts");
        return Err(LeadbridgeError::backend(message));
    }

    let items = match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("contacts") {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(LeadbridgeError::backend(format!(
                    "unexpected contacts payload: {}",
                    other
                )));
            }
        },
        Value::Null => Vec::new(),
        other => {
            return Err(LeadbridgeError::backend(format!(
                "unexpected contacts payload: {}",
                other
            )));
        }
    };

    let mut contacts = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let wire: RemoteContactWire = serde_json::from_value(item)
            .map_err(|e| LeadbridgeError::backend(format!("invalid contact entry: {}", e)))?;
        let source_id = wire
            .id
            .or(wire.resource_name)
            .unwrap_or_else(|| index.to_string());
        let phone = wire.phone_number.unwrap_or_default();
        let name = wire
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| phone.clone());
        contacts.push(Contact::remote(&source_id, name, phone, wire.email));
    }
    Ok(contacts)
}
