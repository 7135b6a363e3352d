//! Generic parameters functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::de::DeserializeOwned;
use std::fs::read_to_string;
use std::path::Path;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// An error that occurs during loading of a parameter file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("The software root environment variable (MOCAP_BRIDGE_ROOT) is not set")]
    SwRootNotSet,

    #[error("Cannot load the parameter file: {0}")]
    FileLoadError(std::io::Error),

    #[error("Cannot read the parameter file: {0}")]
    DeserialiseError(toml::de::Error)
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Load a parameter file
///
/// Relative paths are resolved against the `params` directory under the software root. Absolute
/// paths are used as given.
pub fn load<P>(param_file_path: &str) -> Result<P, LoadError> 
where
    P: DeserializeOwned
{
    let path = if Path::new(param_file_path).is_absolute() {
        Path::new(param_file_path).to_path_buf()
    }
    else {
        let mut path = crate::host::get_sw_root()
            .map_err(|_| LoadError::SwRootNotSet)?;
        path.push("params");
        path.push(param_file_path);
        path
    };

    // Load the file into a string
    let params_str = read_to_string(path).map_err(LoadError::FileLoadError)?;

    from_str(&params_str)
}

/// Parse parameters from a TOML string
pub fn from_str<P>(params_str: &str) -> Result<P, LoadError>
where
    P: DeserializeOwned
{
    toml::from_str(params_str).map_err(LoadError::DeserialiseError)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Example {
        period_s: f64,
        #[serde(default)]
        enabled: bool,
    }

    #[test]
    fn test_from_str() {
        let p: Example = from_str("period_s = 0.05\nenabled = true").unwrap();
        assert_eq!(p, Example { period_s: 0.05, enabled: true });

        let p: Example = from_str("period_s = 1.0").unwrap();
        assert!(!p.enabled);

        match from_str::<Example>("period_s = \"fast\"") {
            Err(LoadError::DeserialiseError(_)) => (),
            r => panic!("Expected a deserialise error, got {:?}", r)
        }
    }
}
