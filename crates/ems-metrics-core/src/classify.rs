//! Keyword classification of free-text transport notes.
//!
//! Each flag is decided by case-insensitive substring matching against
//! curated German phrase lists. Lists are tried in a fixed order per flag
//! and the first list with a hit wins, so a specific negation ("keine
//! medizinische Betreuung notwendig geworden") is seen before the general
//! phrase it contains ("medizinische Betreuung notwendig").

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{id_string, Record, Table};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicalCare {
    Needed,
    NotNeeded,
    LogisticSocialPedagogical,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KtwEquipment {
    Needed,
    NotNeeded,
    AmbulatoryTransportSufficient,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfectiousDisease {
    Needed,
    LocalProtectionSufficient,
    NotNeeded,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrewAssessment {
    Needed,
    NotNeeded,
    AmbulatoryTransportSufficient,
    Unknown,
}

/// Result of classifying one note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementAssessment {
    pub medical_care: MedicalCare,
    pub ktw_equipment: KtwEquipment,
    pub infectious_disease: InfectiousDisease,
    pub crew_assessment: CrewAssessment,
    pub mentions_ambulatory_transport: bool,
}

impl Default for RequirementAssessment {
    fn default() -> Self {
        Self {
            medical_care: MedicalCare::Unknown,
            ktw_equipment: KtwEquipment::Unknown,
            infectious_disease: InfectiousDisease::Unknown,
            crew_assessment: CrewAssessment::Unknown,
            mentions_ambulatory_transport: false,
        }
    }
}

const CARE_LOGISTIC_EXPLICIT: &[&str] = &[
    "keine medizinische betreuung notwendig geworden, sondern lediglich eine logistische",
];
const CARE_NOT_NEEDED: &[&str] = &["keine medizinische betreuung notwendig geworden"];
const CARE_NEEDED: &[&str] = &[
    "medizinische betreuung notwendig",
    "medizinische versorgung erforderlich",
    "ärztliche betreuung notwendig",
    "medizinische intervention",
    "während des transport wurde eine medizinische betreuung notwendig",
];
const CARE_LOGISTIC: &[&str] = &[
    "logistische betreuung",
    "soziale betreuung",
    "pädagogische betreuung",
    "psychologische betreuung",
    "begleitperson notwendig",
];

const KTW_NOT_NEEDED: &[&str] = &[
    "keine besondere ausstattung ktw",
    "keine spezielle ausstattung ktw",
    "während der fahrt war der patient zu keiner zeit auf die besondere ausstattung eines ktw angewiesen",
];
const KTW_AMBULATORY: &[&str] = &[
    "krankenfahrt ausreichend",
    "beförderung als krankenfahrt ausreichend",
    "keine besondere ausstattung eines ktw erforderlich, sodass die beforderung als krankenfahrt ausreichend",
    "lediglich liegend transportiert werden",
    "lediglich im rollstuhl sitzend transportiert werden",
    "der patient muss lediglich liegend / im rollstuhl sitzend transportiert werden",
];
const KTW_NEEDED: &[&str] = &[
    "besondere ausstattung ktw",
    "spezielle ausstattung ktw",
    "rtw ausstattung notwendig",
    "intensivtransport",
    "beatmung notwendig",
    "monitorüberwachung",
    "defibrillator notwendig",
    "während der fahrt war der patient auf die folgende besondere ausstattung eines ktw angewiesen",
];

const INFECTION_NOT_NEEDED: &[&str] = &[
    "keine ansteckende infektionserkrankung",
    "nicht infektiös",
    "keine isolierung notwendig",
    "bei dem patienten ist keine schwere ansteckende infektionserkrankung festgestellt worden oder als wahrscheinlich anzunehmen",
];
const INFECTION_LOCAL: &[&str] = &[
    "lokale schutzmaßnahmen ausreichend",
    "standard hygiene ausreichend",
    "normale schutzmaßnahmen",
    "bei dem patienten liegt eine infektionserkrankung vor, deren verbreitung jedoch durch lokal schutzmaßnahmen ausreichend vermieden werden kann",
];
const INFECTION_NEEDED: &[&str] = &[
    "schwere ansteckende infektionserkrankung",
    "hochinfektiös",
    "isolierung notwendig",
    "quarantäne",
    "infektionsschutz",
    "bei dem patient liegt eine schwere ansteckende infektionserkrankung vor",
];

const CREW_AMBULATORY: &[&str] = &[
    "laut vorliegendem patientenzustand ist eine beförderung des patienten indiziert, jedoch nicht als krankentransport sondern als krankenfahrt",
];
const CREW_NEEDED: &[&str] = &[
    "ärztliche begleitung notwendig",
    "die vorliegenden begründungen der transportverordnung bzw. der übergabe entsprechen den einschätzungen des teamleiters",
];
const CREW_NOT_NEEDED: &[&str] = &[
    "auch bei genauer anamnese ist keine indikationen für einen krankentransport oder eine krankenfahrt erkennbar",
];

/// First entry whose phrase list has a hit in `text`.
fn first_hit<T: Copy>(text: &str, rules: &[(&[&str], T)], fallback: T) -> T {
    rules
        .iter()
        .find(|(phrases, _)| phrases.iter().any(|p| text.contains(p)))
        .map(|(_, flag)| *flag)
        .unwrap_or(fallback)
}

/// Classify a free-text note. `None` yields every flag `Unknown`.
pub fn classify_requirements(text: Option<&str>) -> RequirementAssessment {
    let Some(text) = text else {
        return RequirementAssessment::default();
    };
    let text = text.to_lowercase();

    RequirementAssessment {
        medical_care: first_hit(
            &text,
            &[
                (CARE_LOGISTIC_EXPLICIT, MedicalCare::LogisticSocialPedagogical),
                (CARE_NOT_NEEDED, MedicalCare::NotNeeded),
                (CARE_NEEDED, MedicalCare::Needed),
                (CARE_LOGISTIC, MedicalCare::LogisticSocialPedagogical),
            ],
            MedicalCare::Unknown,
        ),
        ktw_equipment: first_hit(
            &text,
            &[
                (KTW_NOT_NEEDED, KtwEquipment::NotNeeded),
                (KTW_AMBULATORY, KtwEquipment::AmbulatoryTransportSufficient),
                (KTW_NEEDED, KtwEquipment::Needed),
            ],
            KtwEquipment::Unknown,
        ),
        infectious_disease: first_hit(
            &text,
            &[
                (INFECTION_NOT_NEEDED, InfectiousDisease::NotNeeded),
                (INFECTION_LOCAL, InfectiousDisease::LocalProtectionSufficient),
                (INFECTION_NEEDED, InfectiousDisease::Needed),
            ],
            InfectiousDisease::Unknown,
        ),
        crew_assessment: first_hit(
            &text,
            &[
                (CREW_AMBULATORY, CrewAssessment::AmbulatoryTransportSufficient),
                (CREW_NEEDED, CrewAssessment::Needed),
                (CREW_NOT_NEEDED, CrewAssessment::NotNeeded),
            ],
            CrewAssessment::Unknown,
        ),
        mentions_ambulatory_transport: text.contains("krankenfahrt"),
    }
}

/// Flags of the exact-sentence classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrictAssessment {
    pub medical_care: MedicalCare,
    pub ktw_equipment: KtwEquipment,
    pub infectious_disease: InfectiousDisease,
}

/// Classifier that only recognises the full canonical form sentences,
/// case-sensitively. "Needed" sentences are checked first.
pub fn classify_requirements_strict(text: Option<&str>) -> StrictAssessment {
    let Some(text) = text else {
        return StrictAssessment {
            medical_care: MedicalCare::Unknown,
            ktw_equipment: KtwEquipment::Unknown,
            infectious_disease: InfectiousDisease::Unknown,
        };
    };

    let medical_care = if text.contains(
        "Während des Transport wurde eine medizinische Betreuung notwendig. Es wurden folgende Maßnahmen ergriffen:",
    ) {
        MedicalCare::Needed
    } else if text
        .contains("Während des gesamten Transports ist keine medizinische Betreuung notwendig geworden.")
    {
        MedicalCare::NotNeeded
    } else {
        MedicalCare::Unknown
    };

    let ktw_equipment = if text.contains(
        "Während der Fahrt war der Patient auf die folgende besondere Ausstattung eines KTW angewiesen:",
    ) {
        KtwEquipment::Needed
    } else if text.contains(
        "Während der Fahrt war der Patient zu keiner Zeit auf die besondere Ausstattung eines KTW angewiesen",
    ) {
        KtwEquipment::NotNeeded
    } else {
        KtwEquipment::Unknown
    };

    let infectious_disease = if text.contains(
        "Bei dem Patient liegt eine schwere ansteckende Infektionserkrankung vor, sodass lokale Schutzmaßnahmen während des Transportes nicht ausreichen",
    ) {
        InfectiousDisease::Needed
    } else if text.contains(
        "Bei dem Patienten ist keine schwere ansteckende Infektionserkrankung festgestellt worden oder als wahrscheinlich anzunehmen.",
    ) {
        InfectiousDisease::NotNeeded
    } else if text.contains(
        "Bei dem Patienten liegt eine Infektionserkrankung vor, deren Verbreitung jedoch durch lokal Schutzmaßnahmen ausreichend vermieden werden kann",
    ) {
        InfectiousDisease::LocalProtectionSufficient
    } else {
        InfectiousDisease::Unknown
    };

    StrictAssessment {
        medical_care,
        ktw_equipment,
        infectious_disease,
    }
}

/// One classified free-text row.
#[derive(Debug, Clone, Serialize)]
pub struct FreetextRequirementRow {
    #[serde(rename = "protocolId")]
    pub protocol_id: Value,
    pub medical_care: MedicalCare,
    pub ktw_equipment: KtwEquipment,
    pub infectious_disease: InfectiousDisease,
    pub crew_assessment: CrewAssessment,
    pub mentions_ambulatory_transport: bool,
}

impl Record for FreetextRequirementRow {
    const COLUMNS: &'static [&'static str] = &[
        "protocolId",
        "medical_care",
        "ktw_equipment",
        "infectious_disease",
        "crew_assessment",
        "mentions_ambulatory_transport",
    ];
}

/// Classify the notes of a `Freetext` table.
///
/// Reads the `content` column, or `text` when `content` is absent. With
/// `protocol_ids`, only those missions are classified. A table with
/// neither column yields zero rows.
pub fn analyze_freetexts(freetext: &Table, protocol_ids: Option<&HashSet<String>>) -> Table {
    let column = if freetext.has_column("content") {
        "content"
    } else if freetext.has_column("text") {
        "text"
    } else {
        return Table::from_records::<FreetextRequirementRow>("FreetextRequirements", Vec::new());
    };

    let rows = freetext
        .rows
        .iter()
        .filter(|row| match protocol_ids {
            Some(ids) => row
                .get("protocolId")
                .and_then(id_string)
                .is_some_and(|id| ids.contains(&id)),
            None => true,
        })
        .map(|row| {
            let a = classify_requirements(row.get(column).and_then(Value::as_str));
            FreetextRequirementRow {
                protocol_id: row.get("protocolId").cloned().unwrap_or(Value::Null),
                medical_care: a.medical_care,
                ktw_equipment: a.ktw_equipment,
                infectious_disease: a.infectious_disease,
                crew_assessment: a.crew_assessment,
                mentions_ambulatory_transport: a.mentions_ambulatory_transport,
            }
        })
        .collect();

    Table::from_records("FreetextRequirements", rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_none_is_unknown() {
        assert_eq!(classify_requirements(None), RequirementAssessment::default());
    }

    #[test]
    fn test_no_care_needed() {
        let a = classify_requirements(Some(
            "Während des gesamten Transports ist keine medizinische Betreuung notwendig geworden.",
        ));
        assert_eq!(a.medical_care, MedicalCare::NotNeeded);
    }

    #[test]
    fn test_specific_logistic_phrase_overrides_general() {
        let a = classify_requirements(Some(
            "Medizinische Betreuung notwendig? Es ist keine medizinische Betreuung notwendig geworden, \
             sondern lediglich eine logistische Unterstützung.",
        ));
        assert_eq!(a.medical_care, MedicalCare::LogisticSocialPedagogical);
    }

    #[test]
    fn test_care_needed_and_general_logistic() {
        assert_eq!(
            classify_requirements(Some("Ärztliche Betreuung notwendig.")).medical_care,
            MedicalCare::Needed
        );
        assert_eq!(
            classify_requirements(Some("Begleitperson notwendig")).medical_care,
            MedicalCare::LogisticSocialPedagogical
        );
        assert_eq!(
            classify_requirements(Some("Patient wohlauf")).medical_care,
            MedicalCare::Unknown
        );
    }

    #[test]
    fn test_ktw_precedence() {
        // "keine besondere ausstattung ktw" also contains "besondere ausstattung ktw".
        assert_eq!(
            classify_requirements(Some("Keine besondere Ausstattung KTW")).ktw_equipment,
            KtwEquipment::NotNeeded
        );
        assert_eq!(
            classify_requirements(Some("Beförderung als Krankenfahrt ausreichend")).ktw_equipment,
            KtwEquipment::AmbulatoryTransportSufficient
        );
        assert_eq!(
            classify_requirements(Some("Monitorüberwachung erforderlich")).ktw_equipment,
            KtwEquipment::Needed
        );
    }

    #[test]
    fn test_infection_precedence() {
        assert_eq!(
            classify_requirements(Some("keine ansteckende Infektionserkrankung")).infectious_disease,
            InfectiousDisease::NotNeeded
        );
        assert_eq!(
            classify_requirements(Some("Lokale Schutzmaßnahmen ausreichend")).infectious_disease,
            InfectiousDisease::LocalProtectionSufficient
        );
        assert_eq!(
            classify_requirements(Some("Quarantäne angeordnet")).infectious_disease,
            InfectiousDisease::Needed
        );
    }

    #[test]
    fn test_crew_and_mentions() {
        let a = classify_requirements(Some(
            "Laut vorliegendem Patientenzustand ist eine Beförderung des Patienten indiziert, \
             jedoch nicht als Krankentransport sondern als Krankenfahrt.",
        ));
        assert_eq!(a.crew_assessment, CrewAssessment::AmbulatoryTransportSufficient);
        assert!(a.mentions_ambulatory_transport);
    }

    #[test]
    fn test_strict_is_case_sensitive() {
        let text = "Während des gesamten Transports ist keine medizinische Betreuung notwendig geworden.";
        assert_eq!(
            classify_requirements_strict(Some(text)).medical_care,
            MedicalCare::NotNeeded
        );
        assert_eq!(
            classify_requirements_strict(Some(&text.to_lowercase())).medical_care,
            MedicalCare::Unknown
        );
    }

    #[test]
    fn test_analyze_freetexts_filters_protocols() {
        let table = Table::from_documents(
            "Freetext",
            &["protocolId", "content"],
            vec![
                json!({"protocolId": "a", "content": "Krankenfahrt ausreichend"}),
                json!({"protocolId": "b", "content": "Quarantäne"}),
            ],
        );
        let ids: HashSet<String> = ["b".to_string()].into_iter().collect();
        let out = analyze_freetexts(&table, Some(&ids));
        assert_eq!(out.len(), 1);
        assert_eq!(out.rows[0]["infectious_disease"], json!("needed"));
        assert_eq!(out.columns, FreetextRequirementRow::COLUMNS);
    }

    #[test]
    fn test_analyze_freetexts_without_text_column() {
        let table = Table::empty("Freetext", &["protocolId"]);
        let out = analyze_freetexts(&table, None);
        assert!(out.is_empty());
        assert_eq!(out.columns.len(), 6);
    }
}
