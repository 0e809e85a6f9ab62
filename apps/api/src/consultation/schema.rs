//! Result contracts — one table per consultation kind.
//!
//! The same table drives three things: the JSON schema sent to the generation
//! service, the structural rules rendered into prompts, and the validator.

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::consultation::models::ConsultationKind;

/// Allowed number of array items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Count {
    pub min: usize,
    pub max: Option<usize>,
}

impl Count {
    pub const fn exactly(n: usize) -> Self {
        Count {
            min: n,
            max: Some(n),
        }
    }

    pub const fn between(min: usize, max: usize) -> Self {
        Count {
            min,
            max: Some(max),
        }
    }

    pub const fn at_least(min: usize) -> Self {
        Count { min, max: None }
    }

    pub fn contains(&self, len: usize) -> bool {
        len >= self.min && self.max.map_or(true, |max| len <= max)
    }

    pub fn describe(&self) -> String {
        match self.max {
            Some(max) if max == self.min => format!("exactly {max}"),
            Some(max) => format!("between {} and {max}", self.min),
            None => format!("at least {}", self.min),
        }
    }

    pub fn describe_ru(&self) -> String {
        match self.max {
            Some(max) if max == self.min => format!("ровно {max}"),
            Some(max) => format!("от {} до {max}", self.min),
            None => format!("не менее {}", self.min),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Shape {
    Text,
    Texts(Count),
    Records(Count, &'static [Field]),
    Object(&'static [Field]),
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub key: &'static str,
    pub shape: Shape,
}

const fn field(key: &'static str, shape: Shape) -> Field {
    Field { key, shape }
}

const ANY: Count = Count::at_least(1);

// ────────────────────────────────────────────────────────────────────────────
// base
// ────────────────────────────────────────────────────────────────────────────

const CONFLICT_FIELDS: &[Field] = &[
    field("title", Shape::Text),
    field("description", Shape::Text),
    field("manifestations", Shape::Texts(ANY)),
    field("advice", Shape::Text),
];

const PRACTICE_FIELDS: &[Field] = &[
    field("title", Shape::Text),
    field("p1", Shape::Text),
    field("p2", Shape::Text),
];

const PRACTICE_GROUPS: &[Field] = &[
    field(
        "personality",
        Shape::Records(Count::exactly(3), PRACTICE_FIELDS),
    ),
    field("connector", Shape::Records(Count::exactly(3), PRACTICE_FIELDS)),
    field(
        "realization",
        Shape::Records(Count::exactly(3), PRACTICE_FIELDS),
    ),
    field("generator", Shape::Records(Count::exactly(3), PRACTICE_FIELDS)),
    field("mission", Shape::Records(Count::exactly(3), PRACTICE_FIELDS)),
];

pub const BASE_CONTRACT: &[Field] = &[
    field("opener", Shape::Text),
    field("personalitySummary", Shape::Texts(Count::between(3, 4))),
    field("strengths", Shape::Texts(Count::exactly(7))),
    field("weaknesses", Shape::Texts(Count::exactly(7))),
    field("happinessFormula", Shape::Texts(Count::between(2, 3))),
    field("resourceSignals", Shape::Texts(Count::exactly(10))),
    field("deficitSignals", Shape::Texts(Count::exactly(10))),
    field("codesExplanation", Shape::Texts(Count::between(5, 6))),
    field(
        "conflicts",
        Shape::Records(Count::exactly(5), CONFLICT_FIELDS),
    ),
    field("practices", Shape::Object(PRACTICE_GROUPS)),
];

// ────────────────────────────────────────────────────────────────────────────
// target / partner
// ────────────────────────────────────────────────────────────────────────────

const READINESS_FIELDS: &[Field] = &[
    field("motivation", Shape::Text),
    field("resources", Shape::Text),
    field("obstacles", Shape::Text),
];

const TARGET_DIAGNOSTICS: &[Field] = &[
    field("resourceStates", Shape::Texts(ANY)),
    field("readiness", Shape::Object(READINESS_FIELDS)),
    field("questions", Shape::Texts(ANY)),
];

const PARTNER_DIAGNOSTICS: &[Field] = &[
    field("resourceStates", Shape::Texts(ANY)),
    field("readiness", Shape::Object(READINESS_FIELDS)),
    field("questions", Shape::Texts(ANY)),
    field("firstParticipant", Shape::Text),
    field("secondParticipant", Shape::Text),
    field("conflictZones", Shape::Texts(ANY)),
];

const STAGE_FIELDS: &[Field] = &[
    field("title", Shape::Text),
    field("actions", Shape::Texts(ANY)),
    field("result", Shape::Text),
];

const PROGRESS_FIELDS: &[Field] = &[
    field("earlySignals", Shape::Texts(ANY)),
    field("midSignals", Shape::Texts(ANY)),
    field("resultSignals", Shape::Texts(ANY)),
];

const WHAT_IF_FIELDS: &[Field] = &[
    field("fatigue", Shape::Texts(ANY)),
    field("overwhelm", Shape::Texts(ANY)),
    field("relapse", Shape::Texts(ANY)),
    field("pitfalls", Shape::Texts(ANY)),
];

const OBJECTION_FIELDS: &[Field] = &[
    field("objection", Shape::Text),
    field("response", Shape::Text),
];

const COMPATIBILITY_FIELDS: &[Field] = &[
    field("complementary", Shape::Texts(ANY)),
    field("conflicts", Shape::Texts(ANY)),
];

pub const TARGET_CONTRACT: &[Field] = &[
    field("warnings", Shape::Texts(ANY)),
    field("goalDecomposition", Shape::Texts(ANY)),
    field("resourcesForStages", Shape::Texts(ANY)),
    field("currentDiagnostics", Shape::Object(TARGET_DIAGNOSTICS)),
    field("plan123", Shape::Records(Count::exactly(3), STAGE_FIELDS)),
    field("progressMetrics", Shape::Object(PROGRESS_FIELDS)),
    field("whatIf", Shape::Object(WHAT_IF_FIELDS)),
    field("objectionHandling", Shape::Records(ANY, OBJECTION_FIELDS)),
    field("finalStrategy", Shape::Texts(Count::exactly(3))),
];

pub const PARTNER_CONTRACT: &[Field] = &[
    field("warnings", Shape::Texts(ANY)),
    field("goalDecomposition", Shape::Texts(ANY)),
    field("resourcesForStages", Shape::Texts(ANY)),
    field("compatibility", Shape::Object(COMPATIBILITY_FIELDS)),
    field("currentDiagnostics", Shape::Object(PARTNER_DIAGNOSTICS)),
    field("plan123", Shape::Records(Count::exactly(3), STAGE_FIELDS)),
    field("progressMetrics", Shape::Object(PROGRESS_FIELDS)),
    field("whatIf", Shape::Object(WHAT_IF_FIELDS)),
    field("objectionHandling", Shape::Records(ANY, OBJECTION_FIELDS)),
    field("finalStrategy", Shape::Texts(Count::exactly(3))),
];

// ────────────────────────────────────────────────────────────────────────────
// child
// ────────────────────────────────────────────────────────────────────────────

pub const CHILD_CONTRACT: &[Field] = &[
    field("opener", Shape::Text),
    field("childPotential", Shape::Texts(Count::between(3, 5))),
    field("developmentFeatures", Shape::Texts(Count::between(5, 7))),
    field(
        "upbringingRecommendations",
        Shape::Texts(Count::between(7, 10)),
    ),
    field("educationalApproach", Shape::Texts(Count::between(5, 7))),
    field("communicationStyle", Shape::Texts(Count::between(3, 5))),
    field("challengesAndSolutions", Shape::Texts(Count::between(5, 7))),
    field("activitiesAndHobbies", Shape::Texts(Count::between(5, 7))),
    field("parentChildInteraction", Shape::Texts(Count::between(3, 5))),
    field("futureProspects", Shape::Texts(Count::between(2, 3))),
];

pub fn contract(kind: ConsultationKind) -> &'static [Field] {
    match kind {
        ConsultationKind::Base => BASE_CONTRACT,
        ConsultationKind::Target => TARGET_CONTRACT,
        ConsultationKind::Partner => PARTNER_CONTRACT,
        ConsultationKind::Child => CHILD_CONTRACT,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// JSON schema
// ────────────────────────────────────────────────────────────────────────────

/// Structured-output constraint passed to the generation service.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaDescriptor {
    pub name: String,
    pub strict: bool,
    pub schema: Value,
}

pub fn descriptor(kind: ConsultationKind) -> SchemaDescriptor {
    SchemaDescriptor {
        name: format!("{kind}_consultation"),
        strict: true,
        schema: object_schema(contract(kind)),
    }
}

// Strict structured output rejects minItems/maxItems, so counts travel as
// descriptions and are enforced by the validator instead.
fn shape_schema(shape: &Shape) -> Value {
    match shape {
        Shape::Text => json!({"type": "string"}),
        Shape::Texts(count) => json!({
            "type": "array",
            "description": format!("{} items", count.describe()),
            "items": {"type": "string"},
        }),
        Shape::Records(count, fields) => json!({
            "type": "array",
            "description": format!("{} items", count.describe()),
            "items": object_schema(fields),
        }),
        Shape::Object(fields) => object_schema(fields),
    }
}

fn object_schema(fields: &[Field]) -> Value {
    let mut properties = Map::new();
    for f in fields {
        properties.insert(f.key.to_string(), shape_schema(&f.shape));
    }
    let required: Vec<&str> = fields.iter().map(|f| f.key).collect();
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_describe() {
        assert_eq!(Count::exactly(7).describe(), "exactly 7");
        assert_eq!(Count::between(3, 4).describe(), "between 3 and 4");
        assert_eq!(Count::at_least(1).describe(), "at least 1");
        assert_eq!(Count::between(2, 3).describe_ru(), "от 2 до 3");
    }

    #[test]
    fn test_count_contains() {
        assert!(Count::exactly(7).contains(7));
        assert!(!Count::exactly(7).contains(6));
        assert!(Count::between(3, 4).contains(4));
        assert!(!Count::between(3, 4).contains(5));
        assert!(Count::at_least(1).contains(100));
        assert!(!Count::at_least(1).contains(0));
    }

    #[test]
    fn test_partner_contract_extends_target() {
        let target: Vec<&str> = TARGET_CONTRACT.iter().map(|f| f.key).collect();
        let partner: Vec<&str> = PARTNER_CONTRACT.iter().map(|f| f.key).collect();
        for key in &target {
            assert!(partner.contains(key), "partner contract lacks {key}");
        }
        assert!(partner.contains(&"compatibility"));
    }

    #[test]
    fn test_base_schema_is_strict_object() {
        let d = descriptor(ConsultationKind::Base);
        assert_eq!(d.name, "base_consultation");
        assert!(d.strict);
        assert_eq!(d.schema["type"], "object");
        assert_eq!(d.schema["additionalProperties"], false);
        let required = d.schema["required"].as_array().unwrap();
        assert_eq!(required.len(), BASE_CONTRACT.len());
        assert_eq!(
            d.schema["properties"]["practices"]["properties"]["mission"]["items"]["required"],
            json!(["title", "p1", "p2"])
        );
    }

    #[test]
    fn test_every_nested_object_lists_all_properties_as_required() {
        fn check(schema: &Value) {
            if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                let required = schema["required"].as_array().unwrap();
                assert_eq!(props.len(), required.len());
                props.values().for_each(check);
            }
            if let Some(items) = schema.get("items") {
                check(items);
            }
        }
        for kind in ConsultationKind::ALL {
            check(&descriptor(kind).schema);
        }
    }
}
