use std::fmt;

/// Failure kinds of the migration pipeline.
///
/// `InsufficientData` and `DegenerateGeometry` describe data gaps and are
/// turned into sentinel rows by the segment pipeline. Every other kind fails
/// the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationError {
    InsufficientData,
    DegenerateGeometry,
    InvalidParameter,
    ResourceExceeded,
    ExternalService,
    Io,
}

impl MigrationError {
    pub fn is_data_gap(&self) -> bool {
        matches!(self, MigrationError::InsufficientData | MigrationError::DegenerateGeometry)
    }
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            MigrationError::InsufficientData => "insufficient data",
            MigrationError::DegenerateGeometry => "degenerate river geometry",
            MigrationError::InvalidParameter => "invalid parameter",
            MigrationError::ResourceExceeded => "resource limit exceeded",
            MigrationError::ExternalService => "external data source failure",
            MigrationError::Io => "i/o failure",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for MigrationError {}

pub type Result<T> = error_stack::Result<T, MigrationError>;
