//! stackpost-format: persisted processing settings (sans-IO).
//!
//! Converts [`ProcessingSettings`](stackpost_pipeline::ProcessingSettings)
//! to and from an XML settings tree. Reading and writing files is left
//! to the caller; this crate works on strings.

pub mod settings_xml;

pub use settings_xml::{LoadedSections, LoadedSettings, SettingsError, parse_settings, to_settings_xml};
