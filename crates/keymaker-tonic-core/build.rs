/// Generates the gRPC client and server stubs for the `keymaker.Drone` service.
///
/// The messages themselves are declared by hand with `prost` derives in
/// `src/proto.rs`, so only the service plumbing is generated here. The manual
/// builder needs no `protoc` on the build host.
///
/// # Output
///
/// `$OUT_DIR/keymaker.Drone.rs`, included by `src/proto.rs`. It contains the
/// `drone_server` module (the `Drone` trait and `DroneServer`) and the
/// `drone_client` module (`DroneClient`).
fn main() {
    let generate_key = tonic_build::manual::Method::builder()
        .name("generate_key")
        .route_name("GenerateKey")
        .input_type("crate::proto::KeyRequest")
        .output_type("crate::proto::KeyResponse")
        .codec_path("tonic_prost::ProstCodec")
        .build();

    let drone = tonic_build::manual::Service::builder()
        .name("Drone")
        .package("keymaker")
        .comment("Issues freshly generated private keys to authorized clients.")
        .method(generate_key)
        .build();

    tonic_build::manual::Builder::new().compile(&[drone]);
}
