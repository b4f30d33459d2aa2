use serde::{Deserialize, Serialize};

use circuitmap_common::{CircuitMapError, Result};

/// Lifecycle of an import run. Codes are persisted in `circuitmap_synapseimport.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Created,
    Queued,
    Computing,
    Done,
    Error,
    FetchPrePartners,
    FetchPostPartners,
    NoData,
}

impl ImportStatus {
    pub fn code(&self) -> i16 {
        match self {
            ImportStatus::Created => 0,
            ImportStatus::Queued => 1,
            ImportStatus::Computing => 2,
            ImportStatus::Done => 3,
            ImportStatus::Error => 4,
            ImportStatus::FetchPrePartners => 5,
            ImportStatus::FetchPostPartners => 6,
            ImportStatus::NoData => 7,
        }
    }

    pub fn from_code(code: i16) -> Result<Self> {
        Ok(match code {
            0 => ImportStatus::Created,
            1 => ImportStatus::Queued,
            2 => ImportStatus::Computing,
            3 => ImportStatus::Done,
            4 => ImportStatus::Error,
            5 => ImportStatus::FetchPrePartners,
            6 => ImportStatus::FetchPostPartners,
            7 => ImportStatus::NoData,
            other => {
                return Err(CircuitMapError::invalid(format!(
                    "unknown import status code {other}"
                )))
            }
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ImportStatus::Done | ImportStatus::Error | ImportStatus::NoData
        )
    }

    /// Whether a run in `self` may move to `next`. Terminal states never move,
    /// and any live state may fail.
    pub fn can_transition_to(&self, next: ImportStatus) -> bool {
        use ImportStatus::*;
        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Error) => true,
            (Created, Queued) => true,
            (Queued, Computing) => true,
            (Computing, FetchPrePartners | FetchPostPartners | Done | NoData) => true,
            (FetchPrePartners, FetchPostPartners | Done | NoData) => true,
            (FetchPostPartners, Done | NoData) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ImportStatus::Created => "created",
            ImportStatus::Queued => "queued",
            ImportStatus::Computing => "computing",
            ImportStatus::Done => "done",
            ImportStatus::Error => "error",
            ImportStatus::FetchPrePartners => "fetch_pre_partners",
            ImportStatus::FetchPostPartners => "fetch_post_partners",
            ImportStatus::NoData => "no_data",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ImportStatus; 8] = [
        ImportStatus::Created,
        ImportStatus::Queued,
        ImportStatus::Computing,
        ImportStatus::Done,
        ImportStatus::Error,
        ImportStatus::FetchPrePartners,
        ImportStatus::FetchPostPartners,
        ImportStatus::NoData,
    ];

    #[test]
    fn codes_match_persisted_values() {
        let codes: Vec<i16> = ALL.iter().map(|s| s.code()).collect();
        assert_eq!(codes, vec![0, 1, 2, 3, 4, 5, 6, 7]);
        for s in ALL {
            assert_eq!(ImportStatus::from_code(s.code()).unwrap(), s);
        }
        assert!(ImportStatus::from_code(8).is_err());
    }

    #[test]
    fn terminal_states_never_move() {
        for terminal in [ImportStatus::Done, ImportStatus::Error, ImportStatus::NoData] {
            for next in ALL {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn happy_path_with_partners() {
        use ImportStatus::*;
        let path = [Created, Queued, Computing, FetchPrePartners, FetchPostPartners, Done];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(!FetchPostPartners.can_transition_to(FetchPrePartners));
        assert!(!Queued.can_transition_to(Done));
    }
}
