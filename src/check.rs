//! Self-test: parse built-in sample lines and verify the protobuf round trip.

use anyhow::{bail, Context};
use appsinstalled_types::{decode_user_apps, encode_user_apps, parse_line};
use tracing::info;

/// Sample log lines covering two device types.
pub const SAMPLE_LINES: [&str; 2] = [
    "idfa\t1rfw452y52g2gq4g\t55.55\t42.42\t1423,43,567,3,7,23",
    "gaid\t7rfw452y52g2gq4g\t55.55\t42.42\t7423,424",
];

/// Run the self-test over `lines`. Fails on the first line that does not
/// survive parse, encode and decode unchanged.
pub fn check_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> anyhow::Result<usize> {
    let mut checked = 0;
    for line in lines {
        let record = parse_line(line).with_context(|| format!("Cannot parse {line:?}"))?;
        let user_apps = record.user_apps();
        let packed = encode_user_apps(&user_apps)
            .with_context(|| format!("Cannot encode {}", record.key()))?;
        let unpacked = decode_user_apps(&packed)
            .with_context(|| format!("Cannot decode {}", record.key()))?;

        if unpacked != user_apps {
            bail!(
                "Round trip mismatch for {}: wrote {:?}, read {:?}",
                record.key(),
                user_apps,
                unpacked
            );
        }
        info!(
            "{}: {} apps, {} bytes packed",
            record.key(),
            unpacked.apps.len(),
            packed.len()
        );
        checked += 1;
    }
    Ok(checked)
}

/// Run the self-test over [`SAMPLE_LINES`].
pub fn check() -> anyhow::Result<()> {
    let checked = check_lines(SAMPLE_LINES)?;
    info!("Check passed: {} records", checked);
    Ok(())
}
