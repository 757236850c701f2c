// External imports
use log::info;
use std::fs;
use std::path::Path;

// Internal imports
use super::checker::{check_graph, check_runtime_contract};
use super::error::{ExportError, LoadError};
use super::ir::GraphModel;
use super::onnx::{decode_model, encode_model};
use crate::util::file_utils::write_atomic;

/// Validate `model` and write it to `path` as an ONNX `ModelProto`
///
/// The encoded bytes are decoded again and checked before anything touches
/// the disk. The file is written next to its destination and renamed into
/// place, so a failed export never leaves a partial artifact behind.
pub fn save_graph(model: &GraphModel, path: impl AsRef<Path>) -> Result<(), ExportError> {
    let path = path.as_ref();
    check_graph(model)?;
    check_runtime_contract(model)?;

    let encoded = encode_model(model);
    let decoded = decode_model(&encoded).map_err(|e| ExportError::Encode(e.to_string()))?;
    check_graph(&decoded)?;
    check_runtime_contract(&decoded)?;
    if decoded != *model {
        return Err(ExportError::Encode(
            "decoded model differs from the one being saved".to_string(),
        ));
    }

    write_atomic(path, &encoded).map_err(|source| ExportError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    info!(
        "Graph '{}' written to {} ({} bytes)",
        model.graph.name,
        path.display(),
        encoded.len()
    );
    Ok(())
}

/// Read a graph written by [`save_graph`] and re-check its structure
pub fn load_graph(path: impl AsRef<Path>) -> Result<GraphModel, LoadError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let model = decode_model(&bytes)?;
    check_graph(&model)?;
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::placeholder::{placeholder_graph, PlaceholderKind};
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("placeholder.onnx");
        let model = placeholder_graph(&PlaceholderKind::WeightedSum);

        save_graph(&model, &path).unwrap();
        let loaded = load_graph(&path).unwrap();
        assert_eq!(loaded, model);

        // Only the artifact itself remains in the directory
        let entries = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);

        // Protobuf on disk: field 1 (ir_version) comes first
        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes[0], 0x08);
    }

    #[test]
    fn test_invalid_graph_not_written() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.onnx");
        let mut model = placeholder_graph(&PlaceholderKind::WeightedSum);
        model.ir_version = 3;

        assert!(matches!(save_graph(&model, &path), Err(ExportError::Validation(_))));
        assert!(!path.exists());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("garbage.onnx");
        fs::write(&path, b"not a graph").unwrap();
        assert!(matches!(load_graph(&path), Err(LoadError::Decode(_))));
        assert!(matches!(
            load_graph(dir.path().join("missing.onnx")),
            Err(LoadError::Read { .. })
        ));
    }
}
