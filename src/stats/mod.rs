use crate::gameplay::racer::{RaceRank, Racer, RacerFinishedEvent};
use crate::states::GameState;
use crate::track::TrackLayout;
use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const RECORDS_PATH: &str = "records.toml";

/// Write-only best-record sink: the simulation pushes results out on race
/// finish and never reads them back mid-race.
pub struct RaceRecordsPlugin;

impl Plugin for RaceRecordsPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(
            Update,
            record_player_finishes
                .run_if(in_state(GameState::InRace))
                .run_if(resource_exists::<TrackLayout>),
        );
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordsFile {
    #[serde(default)]
    pub records: Vec<TrackRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackRecord {
    pub track_id: String,
    pub best_lap_s: Option<f32>,
    pub best_total_s: f32,
    pub best_rank: usize,
}

impl RecordsFile {
    fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw).unwrap_or_else(|error| {
                warn!("Ignoring malformed records file `{RECORDS_PATH}`: {error}");
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Folds a finished race into the stored bests. Returns true when any
    /// record improved.
    fn merge(&mut self, track_id: &str, lap_s: Option<f32>, total_s: f32, rank: usize) -> bool {
        let Some(record) = self
            .records
            .iter_mut()
            .find(|record| record.track_id == track_id)
        else {
            self.records.push(TrackRecord {
                track_id: track_id.to_string(),
                best_lap_s: lap_s,
                best_total_s: total_s,
                best_rank: rank,
            });
            return true;
        };

        let mut improved = false;
        if let Some(lap) = lap_s {
            if record.best_lap_s.map(|best| lap < best).unwrap_or(true) {
                record.best_lap_s = Some(lap);
                improved = true;
            }
        }
        if total_s < record.best_total_s {
            record.best_total_s = total_s;
            improved = true;
        }
        if rank < record.best_rank {
            record.best_rank = rank;
            improved = true;
        }
        improved
    }
}

fn record_player_finishes(
    layout: Res<TrackLayout>,
    mut finished_events: MessageReader<RacerFinishedEvent>,
    racer_query: Query<(&Racer, &RaceRank)>,
) {
    for event in finished_events.read() {
        let Ok((racer, rank)) = racer_query.get(event.racer) else {
            continue;
        };
        if racer.player_slot.is_none() {
            continue;
        }

        let final_rank = rank.finish_order.unwrap_or(rank.rank);
        let path = Path::new(RECORDS_PATH);
        let mut records = RecordsFile::load(path);
        let improved = records.merge(&layout.id, event.best_lap_s, event.total_s, final_rank);

        match toml::to_string_pretty(&records) {
            Ok(serialized) => {
                if let Err(error) = fs::write(path, serialized) {
                    warn!("Failed to write records file `{RECORDS_PATH}`: {error}");
                } else if improved {
                    info!(
                        "New best for `{}`: rank {}, total {:.2}s.",
                        layout.id,
                        final_rank + 1,
                        event.total_s
                    );
                }
            }
            Err(error) => warn!("Failed to serialize records: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_finish_creates_a_record() {
        let mut records = RecordsFile::default();
        assert!(records.merge("figure_eight", Some(31.5), 98.0, 2));
        assert_eq!(records.records.len(), 1);
        assert_eq!(records.records[0].best_rank, 2);
    }

    #[test]
    fn merge_keeps_the_better_values_per_field() {
        let mut records = RecordsFile::default();
        records.merge("figure_eight", Some(31.5), 98.0, 2);

        // Worse run: nothing changes.
        assert!(!records.merge("figure_eight", Some(40.0), 120.0, 4));
        assert_eq!(records.records[0].best_lap_s, Some(31.5));
        assert_eq!(records.records[0].best_total_s, 98.0);

        // Better lap only: lap updates, total stays.
        assert!(records.merge("figure_eight", Some(29.9), 110.0, 3));
        assert_eq!(records.records[0].best_lap_s, Some(29.9));
        assert_eq!(records.records[0].best_total_s, 98.0);
    }

    #[test]
    fn records_round_trip_through_toml() {
        let mut records = RecordsFile::default();
        records.merge("figure_eight", Some(31.5), 98.0, 0);

        let serialized = toml::to_string_pretty(&records).expect("serializes");
        let parsed: RecordsFile = toml::from_str(&serialized).expect("parses back");
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].track_id, "figure_eight");
    }
}
