use thiserror::Error;

/// Outcome taxonomy for foreground operations.
///
/// `DetectorFailure` only ever appears inside the refresh worker: it is logged there
/// and never returned from `confirm`/`reset`.
#[derive(Debug, Error)]
pub enum ParkingError {
    #[error("no parking data found")]
    NoData,

    #[error("occupancy record unreadable: {0}")]
    MalformedState(String),

    #[error("spot {0} not found")]
    UnknownSpot(String),

    #[error("{0} is reserved for handicapped drivers only")]
    ReservedSpotViolation(String),

    #[error("detector failure: {0}")]
    DetectorFailure(String),

    #[error("storage failure: {0}")]
    Storage(String),
}

impl ParkingError {
    /// HTTP-style status for the transport layer.
    pub fn status_code(&self) -> u16 {
        match self {
            ParkingError::NoData | ParkingError::UnknownSpot(_) => 404,
            ParkingError::ReservedSpotViolation(_) => 403,
            ParkingError::MalformedState(_)
            | ParkingError::DetectorFailure(_)
            | ParkingError::Storage(_) => 500,
        }
    }
}

impl From<std::io::Error> for ParkingError {
    fn from(err: std::io::Error) -> Self {
        ParkingError::Storage(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ParkingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(ParkingError::NoData.status_code(), 404);
        assert_eq!(ParkingError::UnknownSpot("spot_9".into()).status_code(), 404);
        assert_eq!(
            ParkingError::ReservedSpotViolation("spot_1".into()).status_code(),
            403
        );
        assert_eq!(ParkingError::MalformedState("eof".into()).status_code(), 500);
    }

    #[test]
    fn reserved_message_names_the_spot() {
        let err = ParkingError::ReservedSpotViolation("spot_1".into());
        assert_eq!(
            err.to_string(),
            "spot_1 is reserved for handicapped drivers only"
        );
    }
}
