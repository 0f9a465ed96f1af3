use brolink_core::{DossierRepository, MemoryRepository};
use brolink_model::{
    Coordinates, Dossier, DossierId, FieldUnit, MeasurementPointMetadata, MeasurementTvp,
    Observation, ObservationId, ObservationMetadata, ObservationProcess, ObservationType,
    QualityRegime, RegistryId, Tube, TubeState, ValidationStatus, Well, WellId,
};
use chrono::{DateTime, TimeZone, Utc};

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
}

/// A BRO-complete well `GMW000001` with one tube whose top sits at 1.5 m.
pub fn well() -> Well {
    Well {
        id: WellId::new(),
        internal_id: "GMW000001".into(),
        registry_id: Some(RegistryId::parse("GMW000000000001").unwrap()),
        quality_regime: Some(QualityRegime::Imbro),
        delivery_accountable_party: Some("12345678".into()),
        delivery_responsible_party: Some("12345678".into()),
        delivery_context: Some("publiekeTaak".into()),
        construction_standard: Some("NEN5766".into()),
        initial_function: Some("stand".into()),
        coordinates: Some(Coordinates {
            x: 155_000.0,
            y: 463_000.0,
        }),
        horizontal_positioning_method: Some("RTKGPS0tot2cm".into()),
        local_vertical_reference_point: Some("NAP".into()),
        well_offset: Some(0.0),
        vertical_datum: Some("NAP".into()),
        construction_date: None,
        tubes: vec![Tube {
            tube_number: 1,
            tube_type: Some("standaardbuis".into()),
            screen_length: Some(1.0),
            deliver_gld_to_bro: true,
            states: vec![TubeState {
                date_from: at(2020, 1, 1),
                tube_top_position: Some(1.5),
                tube_status: Some("gebruiksklaar".into()),
            }],
        }],
    }
}

pub fn dossier(well: &Well) -> Dossier {
    Dossier {
        id: DossierId::new(),
        tube: well.tube_ref(1),
        registry_id: None,
        quality_regime: Some(QualityRegime::Imbro),
        delivery_accountable_party: None,
        research_start_date: None,
        research_last_date: None,
    }
}

/// Closed, fully assessed observation over January 2024.
pub fn observation(dossier: DossierId) -> Observation {
    Observation {
        id: ObservationId::new(),
        dossier,
        starttime: at(2024, 1, 1),
        endtime: Some(at(2024, 2, 1)),
        result_time: None,
        metadata: ObservationMetadata {
            observation_type: ObservationType::ReguliereMeting,
            status: Some(ValidationStatus::VolledigBeoordeeld),
            responsible_party: Some("12345678".into()),
        },
        process: ObservationProcess {
            measurement_instrument_type: "druksensor".into(),
            air_pressure_compensation_type: Some("KNMImeting".into()),
            process_reference: "NEN-EN-ISO22475v2006".into(),
            evaluation_procedure: "oordeelDeskundige".into(),
        },
        up_to_date_in_bro: false,
        accepted_checksum: None,
        accepted_at: None,
    }
}

pub fn measurement(observation: ObservationId, at: DateTime<Utc>, metres: f64) -> MeasurementTvp {
    MeasurementTvp {
        observation,
        measurement_time: at,
        field_value: Some(metres),
        field_value_unit: FieldUnit::M,
        calculated_value: Some(metres),
        metadata: MeasurementPointMetadata::default(),
    }
}

/// Stores a well and a dossier on its first tube.
pub async fn seed_dossier(repository: &MemoryRepository, well: &Well) -> Dossier {
    let dossier = dossier(well);
    repository.put_well(well).await.unwrap();
    repository.put_dossier(&dossier).await.unwrap();
    dossier
}

/// Stores a closed observation with one measurement per given day.
pub async fn seed_observation(
    repository: &MemoryRepository,
    dossier: DossierId,
    days: &[u32],
) -> Observation {
    let observation = observation(dossier);
    repository.put_observation(&observation).await.unwrap();
    for day in days {
        repository
            .insert_measurement(&measurement(observation.id, at(2024, 1, *day), 1.0 + f64::from(*day) / 100.0))
            .await
            .unwrap();
    }
    observation
}
