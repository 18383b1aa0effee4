//! Reading the version information of a package repository.
//!
//! Only the few elements the update flow needs are extracted from
//! `Updates.xml` and `meta/package.xml`; the files are never rewritten here.

/// One `<PackageUpdate>` entry of `Updates.xml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageUpdate {
    pub name: String,
    pub version: String,
    pub release_date: Option<String>,
}

/// Text of the first `<tag>...</tag>` element in `text`.
pub fn tag_text<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(text[start..end].trim())
}

/// `<Version>` of a `package.xml`.
pub fn read_package_version(package_xml: &str) -> Option<String> {
    tag_text(package_xml, "Version").map(str::to_string)
}

/// All package entries of an `Updates.xml`, in file order.
pub fn parse_updates(updates_xml: &str) -> Vec<PackageUpdate> {
    let mut updates = Vec::new();
    let mut rest = updates_xml;
    while let Some(start) = rest.find("<PackageUpdate>") {
        let body = &rest[start + "<PackageUpdate>".len()..];
        let Some(end) = body.find("</PackageUpdate>") else {
            break;
        };
        let block = &body[..end];
        if let (Some(name), Some(version)) = (tag_text(block, "Name"), tag_text(block, "Version")) {
            updates.push(PackageUpdate {
                name: name.to_string(),
                version: version.to_string(),
                release_date: tag_text(block, "ReleaseDate").map(str::to_string),
            });
        }
        rest = &body[end + "</PackageUpdate>".len()..];
    }
    updates
}

/// Names of packages that are new in `after` or whose version changed.
pub fn changed_components(before: &[PackageUpdate], after: &[PackageUpdate]) -> Vec<String> {
    after
        .iter()
        .filter(|new| {
            !before
                .iter()
                .any(|old| old.name == new.name && old.version == new.version)
        })
        .map(|new| new.name.clone())
        .collect()
}
