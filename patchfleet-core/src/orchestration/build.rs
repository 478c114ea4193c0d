/// Target build encoded in a patch bundle file name.
///
/// Bundles are named `<vendor>-<product>-<build>-<rest>`; the third
/// `-`-delimited token is the build. Names with fewer than three tokens
/// carry no build.
pub fn target_build_from_patch(patch_file: &str) -> Option<String> {
    let file_name = patch_file.rsplit(['/', '\\']).next().unwrap_or(patch_file);
    file_name
        .split('-')
        .nth(2)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Whether an observed build satisfies the target.
///
/// Substring containment, so the full `vmware -v` banner matches a short
/// target. It is loose: `7.0U3` also matches `7.0U3c`. An empty target
/// never matches.
pub fn build_matches(observed: &str, target: &str) -> bool {
    !target.is_empty() && observed.contains(target)
}
