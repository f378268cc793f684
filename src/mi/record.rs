//! Single-line MI record parsing
//!
//! A result or exec-async line (marker already stripped) is a class name,
//! optionally followed by `,key=value,...` fields. The field section is
//! reparsed as a synthetic tuple so the value grammar does all the work.

use serde::{Deserialize, Serialize};

use crate::mi::value::{MiError, MiValue};

/// One parsed reply line: class name plus its fields.
///
/// `fields` is always a composite; a bare class line (e.g. `running`)
/// yields an empty one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiRecord {
    pub class: String,
    pub fields: MiValue,
}

/// Parse one record line into a class name and a field composite.
pub fn parse_record(line: &str) -> Result<MiRecord, MiError> {
    match line.find(',') {
        None => Ok(MiRecord {
            class: line.to_string(),
            fields: MiValue::Composite(Vec::new()),
        }),
        Some(pos) => {
            let (fields, _) = MiValue::parse(&format!("{{{}}}", &line[pos + 1..]))?;
            Ok(MiRecord {
                class: line[..pos].to_string(),
                fields,
            })
        }
    }
}
