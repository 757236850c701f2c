pub mod build_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}
pub mod constants;
pub mod evasion;
pub mod graph;
#[cfg(test)]
pub mod test;
pub mod util {
    pub mod feature_scaler;
    pub mod file_utils;
}
