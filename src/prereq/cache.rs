//! On-disk prerequisite payload cache.
//!
//! Layout is `<root>/<type>/<version>/<file name>`, keyed by the catalog
//! download's architecture-expanded file name rather than content hash.
//! A file already present at the conventional path is reused on name
//! alone when the catalog declares no integrity hash; hash-declared
//! entries are re-verified on reuse and refetched on mismatch. Writes follow
//! the write-temp-then-rename pattern so a crashed download never leaves
//! a half-written file at a final path, and concurrent resolution of
//! distinct keys cannot corrupt each other.

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ir::{Arch, Requirement};
use crate::prereq::{self, PrereqDownload};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Cache key -> absolute local path, as consumed by the chain builder.
pub type ResolvedPrereqs = BTreeMap<(String, String, Option<Arch>), PathBuf>;

/// Resolves (type, version, architecture) triples to local files,
/// downloading on first use. Idempotent across runs.
pub struct PrereqCache {
    root: PathBuf,
    client: reqwest::blocking::Client,
}

impl PrereqCache {
    pub fn new(root: PathBuf) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .context("building prerequisite download client")?;
        Ok(Self { root, client })
    }

    /// Conventional per-user cache location.
    pub fn default_root() -> Result<PathBuf> {
        let base = dirs::cache_dir().context("locating the user cache directory")?;
        Ok(base.join("wixgen").join("prereqs"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve one requirement to a local file.
    ///
    /// A custom source bypasses the cache entirely: it must exist and is
    /// returned unchanged. Otherwise the catalog provides the download
    /// descriptor (with architecture-neutral fallback) and the file is
    /// fetched into the cache unless already present.
    pub fn resolve(
        &self,
        req: &Requirement,
        arch: Option<Arch>,
        work_dir: &Path,
    ) -> Result<PathBuf> {
        if let Some(source) = &req.source {
            let path = Path::new(source);
            let path = if path.is_absolute() {
                path.to_path_buf()
            } else {
                work_dir.join(path)
            };
            if !path.is_file() {
                bail!(
                    "prerequisite source '{}' for {} {} does not exist",
                    path.display(),
                    req.kind,
                    req.version
                );
            }
            return Ok(path);
        }

        let spec = prereq::resolve_spec(&req.kind, &req.version)?;
        let Some(download) = spec.download_for(arch) else {
            bail!(
                "prerequisite {} {} has no {} payload",
                req.kind,
                req.version,
                arch.map(|a| a.as_str()).unwrap_or("architecture-neutral")
            );
        };

        let dest_dir = self.root.join(&req.kind).join(&req.version);
        let dest = dest_dir.join(download.file_name);
        if dest.is_file() {
            match download.sha256 {
                // Hashless entries are reused on name alone.
                None => return Ok(dest),
                Some(expected) => {
                    if sha256_file(&dest)? == expected.to_ascii_lowercase() {
                        return Ok(dest);
                    }
                    // Stale or tampered payload; refetch.
                    fs::remove_file(&dest).with_context(|| {
                        format!("removing stale cache entry '{}'", dest.display())
                    })?;
                }
            }
        }

        fs::create_dir_all(&dest_dir).with_context(|| {
            format!("creating cache directory '{}'", dest_dir.display())
        })?;
        self.download(download, &dest)?;
        Ok(dest)
    }

    fn download(&self, download: &PrereqDownload, dest: &Path) -> Result<()> {
        println!(
            "==> downloading {} -> {}",
            download.url,
            dest.display()
        );

        let tmp = dest.with_file_name(format!("{}.part", download.file_name));
        let mut response = self
            .client
            .get(download.url)
            .send()
            .with_context(|| format!("downloading '{}'", download.url))?;
        if !response.status().is_success() {
            bail!(
                "download '{}' failed with HTTP status {}",
                download.url,
                response.status()
            );
        }

        let mut out = File::create(&tmp)
            .with_context(|| format!("creating '{}'", tmp.display()))?;
        io::copy(&mut response, &mut out)
            .with_context(|| format!("writing '{}'", tmp.display()))?;
        drop(out);

        if let Some(expected) = download.sha256 {
            let actual = sha256_file(&tmp)?;
            if actual != expected.to_ascii_lowercase() {
                let _ = fs::remove_file(&tmp);
                bail!(
                    "sha256 mismatch for '{}': expected {}, got {}",
                    download.url,
                    expected,
                    actual
                );
            }
        }

        fs::rename(&tmp, dest).with_context(|| {
            format!("moving '{}' into place at '{}'", tmp.display(), dest.display())
        })?;
        Ok(())
    }
}

/// Resolve every payload a bundle's prerequisites need, strictly in
/// declaration order, one (type, version, architecture) triple at a time.
///
/// `arches` is the set of product architectures the chain will gate on;
/// architecture-bearing catalog entries resolve one payload per member
/// of the intersection with their supported set, neutral entries exactly
/// one. The first failure aborts the remaining resolution.
pub fn resolve_requirements(
    cache: &PrereqCache,
    requirements: &[Requirement],
    arches: &[Arch],
    work_dir: &Path,
) -> Result<ResolvedPrereqs> {
    let mut resolved = ResolvedPrereqs::new();
    for req in requirements {
        if req.source.is_some() {
            let path = cache.resolve(req, None, work_dir)?;
            resolved.insert((req.kind.clone(), req.version.clone(), None), path);
            continue;
        }
        let spec = prereq::resolve_spec(&req.kind, &req.version)?;
        if spec.is_arch_neutral() {
            let path = cache.resolve(req, None, work_dir)?;
            resolved.insert((req.kind.clone(), req.version.clone(), None), path);
            continue;
        }
        for arch in arches {
            if !spec.supported_arches().contains(arch) {
                continue;
            }
            let path = cache.resolve(req, Some(*arch), work_dir)?;
            resolved.insert(
                (req.kind.clone(), req.version.clone(), Some(*arch)),
                path,
            );
        }
    }
    Ok(resolved)
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .with_context(|| format!("opening '{}' for hashing", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("reading '{}'", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn requirement(kind: &str, version: &str, source: Option<&str>) -> Requirement {
        Requirement {
            kind: kind.to_string(),
            version: version.to_string(),
            source: source.map(str::to_string),
        }
    }

    #[test]
    fn custom_source_bypasses_the_cache() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("runtime.exe"), b"payload").unwrap();
        let cache = PrereqCache::new(tmp.path().join("cache")).unwrap();

        let path = cache
            .resolve(
                &requirement("acme", "9.9", Some("runtime.exe")),
                None,
                tmp.path(),
            )
            .unwrap();
        assert_eq!(path, tmp.path().join("runtime.exe"));
        assert!(!tmp.path().join("cache").exists());
    }

    #[test]
    fn missing_custom_source_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let cache = PrereqCache::new(tmp.path().join("cache")).unwrap();
        let err = cache
            .resolve(
                &requirement("acme", "9.9", Some("nope.exe")),
                None,
                tmp.path(),
            )
            .unwrap_err();
        assert!(err.to_string().contains("nope.exe"));
    }

    #[test]
    fn unknown_type_without_source_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let cache = PrereqCache::new(tmp.path().join("cache")).unwrap();
        let err = cache
            .resolve(&requirement("acme", "9.9", None), None, tmp.path())
            .unwrap_err();
        assert!(err.to_string().contains("acme"));
    }

    #[test]
    fn present_file_is_reused_without_download() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("cache");
        let dest_dir = root.join("vcredist").join("2022");
        fs::create_dir_all(&dest_dir).unwrap();
        let seeded = dest_dir.join("vc_redist.2022.x64.exe");
        fs::write(&seeded, b"cached payload").unwrap();

        let cache = PrereqCache::new(root).unwrap();
        // Resolving twice must hand back the seeded file both times; a
        // download attempt against aka.ms would fail the offline test
        // environment, so reuse is observable as success here.
        for _ in 0..2 {
            let path = cache
                .resolve(
                    &requirement("vcredist", "2022", None),
                    Some(Arch::X64),
                    tmp.path(),
                )
                .unwrap();
            assert_eq!(path, seeded);
        }
        assert_eq!(fs::read(&seeded).unwrap(), b"cached payload");
    }

    #[test]
    fn tampered_hash_declared_entry_is_not_handed_back() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("cache");
        let dest_dir = root.join("dotnetfx").join("4.8");
        fs::create_dir_all(&dest_dir).unwrap();
        let seeded = dest_dir.join("ndp48-x86-x64-allos-enu.exe");
        fs::write(&seeded, b"tampered").unwrap();

        let cache = PrereqCache::new(root).unwrap();
        // The catalog declares a sha256 for this entry, so the seeded
        // file must be verified on reuse. The mismatch forces a refetch,
        // which fails without network access; with it, the replacement
        // must carry the declared hash. Either way the tampered bytes
        // are gone.
        let result = cache.resolve(&requirement("dotnetfx", "4.8", None), None, tmp.path());
        if let Ok(path) = result {
            assert_eq!(
                sha256_file(&path).unwrap(),
                "68c9986a8dcc0214d909aa1f31bee9fb5461bb839edca996a75b08ddffc1483f"
            );
        }
        assert_ne!(fs::read(&seeded).ok(), Some(b"tampered".to_vec()));
    }

    #[test]
    fn resolve_requirements_covers_needed_arches() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("cache");
        for arch in ["x86", "x64"] {
            let dir = root.join("vcredist").join("2022");
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(format!("vc_redist.2022.{}.exe", arch)), b"p").unwrap();
        }
        let cache = PrereqCache::new(root).unwrap();

        let resolved = resolve_requirements(
            &cache,
            &[requirement("vcredist", "2022", None)],
            &[Arch::X86, Arch::X64],
            tmp.path(),
        )
        .unwrap();

        assert_eq!(resolved.len(), 2);
        assert!(resolved
            .contains_key(&("vcredist".to_string(), "2022".to_string(), Some(Arch::X86))));
        assert!(resolved
            .contains_key(&("vcredist".to_string(), "2022".to_string(), Some(Arch::X64))));
    }

    #[test]
    fn sha256_file_hashes_content() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("blob");
        fs::write(&path, b"abc").unwrap();
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
