//! Store Query Filters
//!
//! Filters consumed by the metadata store are JSON expressions over fixed
//! attribute paths. This module owns the attribute path constants and the
//! builders producing each query shape the scheduler emits.

use crate::domain::device::{AdminStatus, FamilyKind};
use crate::domain::media::{FsStatus, MediumId, Tags};
use serde_json::{json, Value};

// =============================================================================
// Attribute Paths
// =============================================================================

pub const DEV_HOST: &str = "DSS::DEV::host";
pub const DEV_ADM_STATUS: &str = "DSS::DEV::adm_status";
pub const DEV_FAMILY: &str = "DSS::DEV::family";

pub const MDA_FAMILY: &str = "DSS::MDA::family";
pub const MDA_ID: &str = "DSS::MDA::id";
pub const MDA_ADM_STATUS: &str = "DSS::MDA::adm_status";
pub const MDA_VOL_FREE: &str = "DSS::MDA::vol_free";
pub const MDA_FS_STATUS: &str = "DSS::MDA::fs_status";
pub const MDA_TAGS: &str = "DSS::MDA::tags";

pub const OBJ_OID: &str = "DSS::OBJ::oid";
pub const OBJ_UUID: &str = "DSS::OBJ::uuid";
pub const OBJ_VERSION: &str = "DSS::OBJ::version";

// =============================================================================
// Filter Builders
// =============================================================================

/// All unlocked devices of `family` attached to `host`.
pub fn usable_devices(host: &str, family: FamilyKind) -> Value {
    json!({
        "$AND": [
            { DEV_HOST: host },
            { DEV_ADM_STATUS: AdminStatus::Unlocked },
            { DEV_FAMILY: family },
        ]
    })
}

/// The single medium row matching `id`.
pub fn medium_by_id(id: &MediumId) -> Value {
    json!({
        "$AND": [
            { MDA_FAMILY: id.family },
            { MDA_ID: id.label },
        ]
    })
}

/// Write candidates: unlocked media of `family` with at least
/// `required_size` free bytes, formatted and not full, carrying every
/// requested tag. Each tag contributes one AND clause.
pub fn write_candidates(family: FamilyKind, required_size: u64, tags: &Tags) -> Value {
    let mut clauses = vec![
        json!({ MDA_FAMILY: family }),
        json!({ MDA_ADM_STATUS: AdminStatus::Unlocked }),
        json!({ "$GTE": { MDA_VOL_FREE: required_size } }),
        json!({ "$NOR": [
            { MDA_FS_STATUS: FsStatus::Blank },
            { MDA_FS_STATUS: FsStatus::Full },
        ]}),
    ];
    for tag in tags.iter() {
        clauses.push(json!({ MDA_TAGS: tag }));
    }
    json!({ "$AND": clauses })
}

/// Object rows by oid, any version.
pub fn object_by_oid(oid: &str, version: Option<u32>) -> Value {
    object_filter(OBJ_OID, oid, version)
}

/// Object rows by uuid, any version.
pub fn object_by_uuid(uuid: &str, version: Option<u32>) -> Value {
    object_filter(OBJ_UUID, uuid, version)
}

fn object_filter(path: &str, value: &str, version: Option<u32>) -> Value {
    let mut clauses = vec![json!({ path: value })];
    if let Some(v) = version {
        clauses.push(json!({ OBJ_VERSION: v }));
    }
    json!({ "$AND": clauses })
}
