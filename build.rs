fn main() {
    // Package name and version end up in the exported graph's producer fields
    built::write_built_file().expect("Failed to generate build info");

    // ONNX message types; protox parses the schema so no system protoc is needed
    println!("cargo:rerun-if-changed=proto/onnx.proto");
    let descriptors =
        protox::compile(["onnx.proto"], ["proto"]).expect("Failed to parse proto/onnx.proto");
    prost_build::Config::new()
        .compile_fds(descriptors)
        .expect("Failed to generate ONNX protobuf types");
}
