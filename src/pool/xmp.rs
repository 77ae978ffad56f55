//! Tag extraction from XMP sidecar files.
//!
//! Tags live in the `dc:subject` bag as `key=value1+value2` strings:
//!
//! ```text
//! <dc:subject>
//!   <rdf:Bag>
//!     <rdf:li>grp=beach2021</rdf:li>
//!     <rdf:li>only=grandma+grandpa</rdf:li>
//!     <rdf:li>sunset</rdf:li>          <!-- ignored: no '=' -->
//!   </rdf:Bag>
//! </dc:subject>
//! ```
//!
//! A sidecar is looked up next to the image (`photo.jpg.xmp`, then
//! `photo.xmp`) and finally in Geeqie's metadata directory
//! (`~/.local/share/geeqie/metadata/<absolute path>.gq.xmp`).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const DC_NS: &str = "http://purl.org/dc/elements/1.1/";

/// Tag name → set of values.
pub type TagSets = BTreeMap<String, BTreeSet<String>>;

/// Possible sidecar locations for `image`, in lookup order.
pub fn sidecar_candidates(image: &Path) -> Vec<PathBuf> {
    let mut candidates = Vec::with_capacity(3);

    let mut appended = image.as_os_str().to_os_string();
    appended.push(".xmp");
    candidates.push(PathBuf::from(appended));
    candidates.push(image.with_extension("xmp"));

    if let Some(home) = std::env::var_os("HOME")
        && image.is_absolute()
    {
        let mut geeqie = PathBuf::from(home)
            .join(".local/share/geeqie/metadata")
            .into_os_string();
        geeqie.push(image.as_os_str());
        geeqie.push(".gq.xmp");
        candidates.push(PathBuf::from(geeqie));
    }
    candidates
}

/// First existing sidecar for `image`.
pub fn find_sidecar(image: &Path) -> Option<PathBuf> {
    sidecar_candidates(image).into_iter().find(|p| p.is_file())
}

/// Parse the `dc:subject` tags of an XMP document.
pub fn parse_tags(xml: &str) -> Result<TagSets, roxmltree::Error> {
    let doc = roxmltree::Document::parse(xml)?;
    let mut tags = TagSets::new();

    let items = doc
        .descendants()
        .filter(|n| n.has_tag_name((DC_NS, "subject")))
        .flat_map(|subject| subject.children().filter(|n| n.has_tag_name((RDF_NS, "Bag"))))
        .flat_map(|bag| bag.children().filter(|n| n.has_tag_name((RDF_NS, "li"))));

    for item in items {
        let Some(text) = item.text() else {
            continue;
        };
        let Some((key, values)) = text.trim().split_once('=') else {
            continue;
        };
        let set = tags.entry(key.trim().to_string()).or_default();
        set.extend(
            values
                .split('+')
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
        );
    }
    Ok(tags)
}
