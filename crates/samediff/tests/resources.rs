use std::fs;

use samediff::resources::{sha256_hex, ResourceError, ResourceReference, ResourceResolver};

#[test]
fn sha256_known_vectors() {
    assert_eq!(
        sha256_hex(b""),
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
    assert_eq!(
        sha256_hex(b"abc"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn resolves_direct_files_first() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    fs::write(dir.path().join("model.bin"), b"weights")?;

    let resolver = ResourceResolver::new(vec![dir.path().to_path_buf()], cache.path());
    let path = resolver.resolve("model.bin")?;
    assert_eq!(fs::read(path)?, b"weights");
    Ok(())
}

#[test]
fn missing_resource_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = ResourceResolver::new(vec![dir.path().to_path_buf()], dir.path().join("cache"));
    let err = resolver.resolve("nope.bin").unwrap_err();
    assert!(matches!(err, ResourceError::NotFound(_)));
}

#[test]
fn resolves_through_reference_and_cache() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    let resolver = ResourceResolver::new(vec![dir.path().to_path_buf()], cache.path());

    // Store content, then write the sidecar the resolver will follow.
    let reference = resolver.store(b"model payload")?;
    fs::write(
        dir.path().join("model.bin.resource_reference"),
        serde_json::to_string(&reference)?,
    )?;

    let path = resolver.resolve("model.bin")?;
    assert_eq!(fs::read(path)?, b"model payload");
    Ok(())
}

#[test]
fn cache_miss_reports_the_hash() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    let resolver = ResourceResolver::new(vec![dir.path().to_path_buf()], cache.path());

    let reference = ResourceReference {
        sha256: sha256_hex(b"never stored"),
        size: 12,
    };
    fs::write(
        dir.path().join("data.npy.resource_reference"),
        serde_json::to_string(&reference)?,
    )?;

    let err = resolver.resolve("data.npy").unwrap_err();
    assert!(matches!(err, ResourceError::NotCached { .. }));
    Ok(())
}

#[test]
fn corrupted_cache_entry_is_detected() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let cache = tempfile::tempdir()?;
    let resolver = ResourceResolver::new(vec![dir.path().to_path_buf()], cache.path());

    let reference = resolver.store(b"original content")?;
    fs::write(
        dir.path().join("x.resource_reference"),
        serde_json::to_string(&reference)?,
    )?;

    // Overwrite the cached file with same-length garbage.
    let cached = cache
        .path()
        .join(&reference.sha256[..2])
        .join(&reference.sha256);
    fs::write(&cached, b"corrupted conten")?;

    let err = resolver.resolve("x").unwrap_err();
    assert!(matches!(err, ResourceError::HashMismatch { .. }));
    Ok(())
}

#[test]
fn malformed_reference_is_an_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let resolver =
        ResourceResolver::new(vec![dir.path().to_path_buf()], dir.path().join("cache"));
    fs::write(dir.path().join("y.resource_reference"), b"{not json")?;
    let err = resolver.resolve("y").unwrap_err();
    assert!(matches!(err, ResourceError::BadReference { .. }));
    Ok(())
}
