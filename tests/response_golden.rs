use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use enclave_signer::keys::{KeyError, KeyManager, SignatureService};
use enclave_signer::response::{EnclaveResponse, ResponseService};
use enclave_signer::tee::{EnclaveMeasurement, SealedCodec, SimulatedEnclave};
use enclave_signer::{Cell, Config};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SECRET_KEY: &str =
    "yMJNiUZf3kMeEkQ+0r57+Ou8DEfOKmNC/BCN9c2TfPc5PICixeaQ8vlV/79OARLthRMyTOXEVDU16/1JY3BP1Q==";

fn test_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("enclave-golden-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn enclave(code: &str) -> SealedCodec {
    let measurement = EnclaveMeasurement::compute(code, "vendor", 1, 1);
    SealedCodec::new(Arc::new(SimulatedEnclave::new(measurement).unwrap()))
}

fn responses(root: &Path, codec: SealedCodec) -> ResponseService {
    let config = Config::with_root(root, "1.0.0").unwrap();
    let signer = SignatureService::new(KeyManager::new(config.signature_keys.clone(), codec));
    ResponseService::new(config.response, signer)
}

#[test]
fn pack_matches_golden_cell() {
    let dir = test_dir();
    let svc = responses(&dir, enclave("app"));
    svc.signer()
        .save_signature_key(&STANDARD.decode(SECRET_KEY).unwrap())
        .unwrap();

    let payload = Cell::from_boc(
        &STANDARD
            .decode("te6cckEBAQEAMgAAYAAAAABmalYRAAAAAHJxYCMAAAAAAAAC9AAAAAnwlP1UAAAAAAAAA2QAAAAAAAArd2S53VY=")
            .unwrap(),
    )
    .unwrap();
    let cell = svc.pack_response_to_cell(&payload, 0x9f89304e).unwrap();

    assert_eq!(
        STANDARD.encode(cell.to_boc()),
        "te6cckEBAgEAeQABaJ+JME4AAAAAZmpWEQAAAABycWAjAAAAAAAAAvQAAAAJ8JT9VAAAAAAAAANkAAAAAAAAK3cBAIDQxyqnFZq6P51cgXzD37pklWI2NSRjpwoaKWQY3SkrV59otUulbVoU7JMhyM3LYU3u4k/prBCqNkK6G2MPSysIfrV1mg=="
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn imported_key_signs_golden_response() {
    let dir = test_dir();
    responses(&dir, enclave("app"))
        .signer()
        .save_signature_key(&STANDARD.decode(SECRET_KEY).unwrap())
        .unwrap();

    let payload_b64 =
        "te6cckEBAQEAMgAAYAAAAABmOjrBAAAAAHJxYCMAAAAAAAABWQAAABMVr91EAAAAAAAABh4AAAAAAAAq11siUa4=";
    let payload = Cell::from_boc(&STANDARD.decode(payload_b64).unwrap()).unwrap();

    // Fresh service: the key comes back from sealed storage.
    let response = responses(&dir, enclave("app")).save_response(&payload).unwrap();
    assert_eq!(response.payload, payload_b64);
    assert_eq!(response.hash, "KWraQp7R+lYAaGw9VqJnMeKcar9q+mKtudCST/4h3GY=");
    assert_eq!(
        response.signature,
        "Id3NO8Tbq4ZFcZ1mp4gr78g7+SgmHuCdTSSBXmzXYy7u3W/UPisnTsE7CuDUATiaOFnE208w1fyb8+s6BM/0BA=="
    );
    assert_eq!(EnclaveResponse::load(dir.join("response.json")).unwrap(), response);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn responses_stable_across_restarts() {
    let dir = test_dir();
    let first = responses(&dir, enclave("app")).save_response(&Cell::empty()).unwrap();
    let second = responses(&dir, enclave("app")).save_response(&Cell::empty()).unwrap();
    assert_eq!(first, second);

    let public: [u8; 32] = std::fs::read(dir.join("signature_key.pub"))
        .unwrap()
        .try_into()
        .unwrap();
    assert!(second.verify(&public).unwrap());

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn other_enclave_build_is_refused() {
    let dir = test_dir();
    responses(&dir, enclave("app")).save_response(&Cell::empty()).unwrap();
    std::fs::remove_file(dir.join("response.json")).unwrap();

    let err = responses(&dir, enclave("patched-app"))
        .save_response(&Cell::empty())
        .unwrap_err();
    assert!(matches!(
        err,
        enclave_signer::ResponseError::Key(KeyError::TamperOrCorruption { .. })
    ));
    assert!(!dir.join("response.json").exists());

    let _ = std::fs::remove_dir_all(&dir);
}
