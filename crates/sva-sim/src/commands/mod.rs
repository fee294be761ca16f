pub mod inspect;
pub mod resume;
pub mod run;
pub mod version;

use std::error::Error;
use std::fs;
use std::path::Path;

use serde::Serialize;

pub(crate) fn write_json<T: Serialize>(path: impl AsRef<Path>, value: &T) -> Result<(), Box<dyn Error>> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
