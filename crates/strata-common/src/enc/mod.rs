//! Reversible character and word packers for the vintage formats.

pub mod baudot;
pub mod fiodec;
pub mod pack12;
pub mod pack18;
pub mod rad50;
pub mod sixbit;
