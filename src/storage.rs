use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::debug;

use crate::rib::{EntrySource, RouteStore};

/// How many routes to render between reactor yields during a dump
const YIELD_EVERY: usize = 1000;

/// Persist the route table. The rendered form is one route-spec per line,
/// so a dump can be replayed through the command API.
pub async fn dump_routes(path: &Path, store: &RouteStore) -> io::Result<()> {
    let mut contents = String::with_capacity(store.len() * 64);
    let mut rendered = 0usize;
    // Index order keeps dumps diffable across runs
    for (index, route, source) in store.iter().sorted_by(|a, b| a.0.cmp(b.0)) {
        contents.push_str(&format!(
            "{} # source {} index 0x{}\n",
            route,
            source_tag(source),
            crate::utils::to_hex(index)
        ));
        rendered += 1;
        if rendered % YIELD_EVERY == 0 {
            // Let the reactor service sockets during large dumps
            tokio::task::yield_now().await;
        }
    }

    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_atomically(&target, &contents))
        .await
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))??;
    debug!("Dumped {} routes to {}", rendered, path.display());
    Ok(())
}

fn source_tag(source: EntrySource) -> &'static str {
    match source {
        EntrySource::Api => "api",
        EntrySource::Config => "config",
        EntrySource::Peer(_) => "peer",
    }
}

/// Write-to-temp, fsync, back up the old file, rename over the target.
/// A crash at any point leaves either the old file or the new one.
fn write_atomically(target: &Path, contents: &str) -> io::Result<()> {
    let temp = temp_path(target);
    {
        let mut file = File::create(&temp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    if target.exists() {
        let mut backup = target.as_os_str().to_owned();
        backup.push(".backup");
        fs::copy(target, PathBuf::from(backup))?;
    }
    fs::rename(&temp, target)?;
    Ok(())
}

fn temp_path(target: &Path) -> PathBuf {
    let mut temp = target.as_os_str().to_owned();
    temp.push(".tmp");
    PathBuf::from(temp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::attributes::{AsPath, Origin, PathAttribute};
    use crate::message::nlri::{Nlri, PrefixNlri};
    use crate::message::Attributes;
    use crate::rib::{NextHop, Route};

    fn store_with_routes(count: usize) -> RouteStore {
        let mut store = RouteStore::new();
        for i in 0..count {
            let prefix = format!("10.{}.{}.0/24", i / 256, i % 256);
            let attrs = Attributes::new()
                .with(PathAttribute::Origin(Origin::Igp))
                .with(PathAttribute::AsPath(AsPath::sequence(vec![65000])));
            store.acquire(
                Route::new(
                    Nlri::Unicast(PrefixNlri::new(prefix.parse().unwrap(), None)),
                    attrs,
                    NextHop::Address("1.2.3.4".parse().unwrap()),
                ),
                EntrySource::Api,
            );
        }
        store
    }

    #[tokio::test]
    async fn test_dump_creates_backup_on_rewrite() {
        let dir = std::env::temp_dir().join(format!("bgpsd-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("routes.dump");

        let store = store_with_routes(3);
        dump_routes(&path, &store).await.unwrap();
        let first = fs::read_to_string(&path).unwrap();
        assert_eq!(first.lines().count(), 3);
        assert!(first.contains("10.0.0.0/24"));
        assert!(first.contains("next-hop 1.2.3.4"));

        let store = store_with_routes(5);
        dump_routes(&path, &store).await.unwrap();
        let second = fs::read_to_string(&path).unwrap();
        assert_eq!(second.lines().count(), 5);

        let backup = fs::read_to_string(dir.join("routes.dump.backup")).unwrap();
        assert_eq!(backup, first);

        fs::remove_dir_all(&dir).unwrap();
    }
}
