//! Content-addressed publisher identities.

use crate::layer::PublisherId;
use crate::observability::events;
use std::collections::HashMap;
use tracing::debug;

const COMPONENT: &str = "publisher_registry";

/// First id handed out. Ids are never reused.
pub(crate) const FIRST_PUBLISHER_ID: u32 = 1;

#[derive(Default)]
pub(crate) struct PublisherRegistry {
    ids_by_info: HashMap<Vec<u8>, PublisherId>,
    infos: Vec<Vec<u8>>,
}

impl PublisherRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `info`, assigning the next one if these bytes were never
    /// seen before.
    pub(crate) fn id_for_info(&mut self, info: &[u8]) -> PublisherId {
        if let Some(publisher_id) = self.ids_by_info.get(info) {
            return *publisher_id;
        }

        let publisher_id = PublisherId(FIRST_PUBLISHER_ID + self.infos.len() as u32);
        self.infos.push(info.to_vec());
        self.ids_by_info.insert(info.to_vec(), publisher_id);

        debug!(
            event = events::PUBLISHER_ID_ASSIGNED,
            component = COMPONENT,
            publisher_id = publisher_id.0,
            info_len = info.len(),
            "assigned new publisher id"
        );
        publisher_id
    }

    pub(crate) fn publisher_info(&self, publisher_id: PublisherId) -> Option<&[u8]> {
        let index = publisher_id.0.checked_sub(FIRST_PUBLISHER_ID)? as usize;
        self.infos.get(index).map(Vec::as_slice)
    }
}
