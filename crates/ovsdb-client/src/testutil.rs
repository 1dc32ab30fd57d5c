//! Shared fixtures for unit tests: a cut-down Open_vSwitch schema.

use serde_json::{json, Value};

use crate::schema::DatabaseSchema;

pub(crate) fn bridge_schema_json() -> Value {
    json!({
        "version": "7.6.2",
        "tables": {
            "Bridge": {
                "columns": {
                    "name": {"type": "string"},
                    "datapath_type": {"type": "string"},
                    "fail_mode": {"type": {
                        "key": {"type": "string", "enum": ["set", ["standalone", "secure"]]},
                        "min": 0, "max": 1
                    }},
                    "stp_enable": {"type": "boolean"},
                    "flood_vlans": {"type": {
                        "key": {"type": "integer"}, "min": 0, "max": 4096
                    }},
                    "ports": {"type": {
                        "key": "uuid", "min": 0, "max": "unlimited"
                    }},
                    "other_config": {"type": {
                        "key": "string", "value": "string", "min": 0, "max": "unlimited"
                    }}
                }
            },
            "Open_vSwitch": {
                "columns": {
                    "bridges": {"type": {"key": "uuid", "min": 0, "max": "unlimited"}}
                }
            }
        }
    })
}

pub(crate) fn bridge_schema() -> DatabaseSchema {
    DatabaseSchema::from_json("Open_vSwitch", &bridge_schema_json())
        .unwrap()
        .with_internal_columns()
}
