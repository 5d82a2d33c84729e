//! Obfuscator: structured input to tagged bundle.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;

use crate::derive::derive_token;
use crate::model::{
    entity_tag, StructuredInput, TaggedBundle, HIGHEST_ROLE_MARKER, INTENT_TAG, NODE_TAG,
    PROTOCOL_TAG, TIME_MARKER,
};
use crate::params::ParameterSet;
use crate::security::integrity_tag;
use crate::transform::obfuscate;

/// Value stored under the highest-privilege role marker.
pub const ROLE_MARKER_VALUE: &str = "HKP-derived";

/// Field name the intent token is derived for.
pub const INTENT_FIELD: &str = "intent";

/// Format a UTC instant as a time tag.
pub fn time_tag(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Obfuscate `input` under `params`, stamped with the current time.
pub fn obfuscate_input<R: Rng + ?Sized>(
    input: &StructuredInput,
    params: &ParameterSet,
    rng: &mut R,
) -> TaggedBundle {
    obfuscate_input_at(input, params, Utc::now(), rng)
}

/// Obfuscate `input` under `params`, stamped with `issued_at`.
pub fn obfuscate_input_at<R: Rng + ?Sized>(
    input: &StructuredInput,
    params: &ParameterSet,
    issued_at: DateTime<Utc>,
    rng: &mut R,
) -> TaggedBundle {
    tracing::info!(
        "Obfuscating intent with {} entities at {}",
        input.entities.len(),
        input.role_level
    );

    let role = input.role_level;
    let mut fields = BTreeMap::new();

    let intent_token = derive_token(INTENT_FIELD, role, params);
    fields.insert(
        INTENT_TAG.to_string(),
        obfuscate(&input.intent, &intent_token, rng),
    );

    for (name, value) in &input.entities {
        let token = derive_token(name, role, params);
        fields.insert(entity_tag(name), obfuscate(value, &token, rng));
    }

    // filler, not derived from the input
    fields.insert(
        PROTOCOL_TAG.to_string(),
        format!("BXR_Λ{:02}", rng.gen_range(0..100)),
    );
    fields.insert(
        NODE_TAG.to_string(),
        format!("E{:02}_Tau", rng.gen_range(0..100)),
    );

    let time_tag = time_tag(issued_at);
    fields.insert(
        HIGHEST_ROLE_MARKER.to_string(),
        ROLE_MARKER_VALUE.to_string(),
    );
    fields.insert(TIME_MARKER.to_string(), time_tag.clone());

    let integrity_tag = integrity_tag(&fields);

    let bundle = TaggedBundle {
        fields,
        role_tag: role.role_tag(),
        integrity_tag,
        time_tag,
    };
    tracing::debug!("Obfuscator output: {:?}", bundle);
    bundle
}
