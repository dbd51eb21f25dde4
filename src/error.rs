use thiserror::Error;

#[derive(Error, Debug)]
pub enum LandscapeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Projection error: {0}")]
    Projection(String),

    #[error("Raster error: {0}")]
    Raster(String),

    #[error("Vector error: {0}")]
    Vector(String),

    #[error("{0}")]
    Resource(String),

    #[error("{0}")]
    Consistency(String),

    #[error("Data source error: {0}")]
    DataSource(String),
}

impl From<anyhow::Error> for LandscapeError {
    fn from(err: anyhow::Error) -> Self {
        LandscapeError::Raster(format!("{:#}", err))
    }
}

pub type Result<T> = std::result::Result<T, LandscapeError>;
