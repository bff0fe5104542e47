pub mod archive;
pub mod cellar;
pub mod check;
pub mod cleanup;
pub mod descriptor;
pub mod digest;
pub mod error;
pub mod fetch;
pub mod install;
pub mod plan;
pub mod runtime;

#[cfg(test)]
pub mod test_utils {
    //! Shared fixtures for unit tests.

    use crate::descriptor::{PackageDescriptor, PinnedResource, RemoteArtifact, VerificationSpec};
    use crate::digest::Sha256Digest;
    use std::path::PathBuf;

    /// A small but realistic descriptor: a Python CLI tool with two pinned
    /// runtime resources. Digests are derived from the names so every pin is
    /// distinct and the descriptor validates.
    pub fn sample_descriptor() -> PackageDescriptor {
        PackageDescriptor {
            name: "polyparse".into(),
            version: "0.1.0".into(),
            source: RemoteArtifact {
                url: "http://files.example/polyparse-0.1.0.tar.gz".into(),
                sha256: Sha256Digest::compute(b"polyparse-0.1.0"),
            },
            license: Some("MIT".into()),
            system_dependencies: vec!["python@3.11".into()],
            resources: vec![
                pinned_resource("selenium", &[]),
                pinned_resource("python-dateutil", &[]),
            ],
            entry_point: PathBuf::from("bin/polyparse"),
            verification: VerificationSpec {
                args: vec!["--help".into()],
                expect: "CLI tool".into(),
            },
        }
    }

    pub fn pinned_resource(name: &str, requires: &[&str]) -> PinnedResource {
        PinnedResource {
            name: name.into(),
            url: format!("http://files.example/{}-1.0.0.tar.gz", name),
            sha256: Sha256Digest::compute(name.as_bytes()),
            requires: requires.iter().map(|r| r.to_string()).collect(),
        }
    }

    pub fn create_tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
        let entries: Vec<(&str, &str, u32)> =
            files.iter().map(|(p, c)| (*p, *c, 0o644)).collect();
        create_tar_gz_with_modes(&entries)
    }

    pub fn create_tar_gz_with_modes(files: &[(&str, &str, u32)]) -> Vec<u8> {
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::default(),
        ));
        for (path, content, mode) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(*mode);
            header.set_cksum();
            builder
                .append_data(&mut header, path, content.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }
}
