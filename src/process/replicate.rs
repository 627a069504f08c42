// src/process/replicate.rs
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info};

use crate::lookup::geocode::{is_state_geocode, parent_geocode};
use crate::manifest::ProcessingError;
use crate::model::Record;

/// Fields a city record must share with a state record to inherit it.
type TreatmentKey = (String, String, String, String);

fn treatment_key(r: &Record) -> TreatmentKey {
    (
        r.group.clone(),
        r.item.clone(),
        r.customer.clone(),
        r.provider.clone(),
    )
}

/// Copy parent-state treatments into city records that lack them.
///
/// For every city geocode and key (group, item, customer, provider), state
/// records under the parent geocode with the same key are copied in when
/// the city has no record with that `(tax_type, tax_cat)` pair yet. A city
/// key with no state record at all is reported once per city geocode.
pub fn replicate_state_treatments(records: Vec<Record>) -> (Vec<Record>, Vec<ProcessingError>) {
    let mut state_index: HashMap<(String, TreatmentKey), Vec<usize>> = HashMap::new();
    // BTreeMap keeps the added records and gap errors in a stable order.
    let mut city_groups: BTreeMap<(String, TreatmentKey), HashSet<(String, String)>> =
        BTreeMap::new();

    for (i, r) in records.iter().enumerate() {
        if is_state_geocode(&r.geocode) {
            state_index
                .entry((r.geocode.clone(), treatment_key(r)))
                .or_default()
                .push(i);
        } else {
            city_groups
                .entry((r.geocode.clone(), treatment_key(r)))
                .or_default()
                .insert((r.tax_type.clone(), r.tax_cat.clone()));
        }
    }

    let mut added = Vec::new();
    let mut gaps: BTreeMap<String, usize> = BTreeMap::new();
    for ((geocode, key), mut present) in city_groups {
        let parent = parent_geocode(&geocode);
        match state_index.get(&(parent, key)) {
            Some(state_rows) => {
                for &i in state_rows {
                    let state = &records[i];
                    if present.insert((state.tax_type.clone(), state.tax_cat.clone())) {
                        added.push(state.with_geocode(geocode.clone()));
                    }
                }
            }
            None => *gaps.entry(geocode).or_default() += 1,
        }
    }

    let errors = gaps
        .into_iter()
        .map(|(geocode, records)| ProcessingError::ReplicationGap {
            parent_geocode: parent_geocode(&geocode),
            geocode,
            records,
        })
        .collect::<Vec<_>>();

    info!(
        added = added.len(),
        gaps = errors.len(),
        "replicated state treatments"
    );
    debug!(total = records.len() + added.len(), "records after replication");
    let mut records = records;
    records.extend(added);
    (records, errors)
}
