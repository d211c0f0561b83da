//! Pure, side-effect-free codecs over byte slices.
pub mod crc;
pub mod stuffing;
