//! Extension to MIME type mapping for reconstructed source files.

/// Fallback for extensions missing from the table.
pub const DEFAULT_MIME: &str = "text/plain";

const MIME_TABLE: &[(&str, &str)] = &[
    ("js", "application/javascript"),
    ("jsx", "application/javascript"),
    ("ts", "application/typescript"),
    ("tsx", "application/typescript"),
    ("css", "text/css"),
    ("scss", "text/x-scss"),
    ("sass", "text/x-sass"),
    ("less", "text/x-less"),
    ("json", "application/json"),
    ("html", "text/html"),
    ("vue", "text/x-vue"),
];

/// MIME type for a cleaned source path, chosen by its lowercased extension.
pub fn mime_for_path(path: &str) -> &'static str {
    let Some(ext) = extension(path) else {
        return DEFAULT_MIME;
    };
    let ext = ext.to_ascii_lowercase();

    MIME_TABLE
        .iter()
        .find(|(known, _)| *known == ext)
        .map(|(_, mime)| *mime)
        .unwrap_or(DEFAULT_MIME)
}

/// Text after the last `.` of the final path segment.
fn extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (_, ext) = name.rsplit_once('.')?;
    if ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_listed_extension() {
        let cases = [
            ("src/index.js", "application/javascript"),
            ("src/App.jsx", "application/javascript"),
            ("src/api.ts", "application/typescript"),
            ("src/View.tsx", "application/typescript"),
            ("styles/main.css", "text/css"),
            ("styles/theme.scss", "text/x-scss"),
            ("styles/legacy.sass", "text/x-sass"),
            ("styles/vars.less", "text/x-less"),
            ("data/config.json", "application/json"),
            ("public/index.html", "text/html"),
            ("components/Button.vue", "text/x-vue"),
        ];

        for (path, expected) in cases {
            assert_eq!(mime_for_path(path), expected, "{path}");
        }
    }

    #[test]
    fn test_unlisted_extensions() {
        assert_eq!(mime_for_path("static/app.js.map"), "text/plain");
        assert_eq!(mime_for_path("README.md"), "text/plain");
        assert_eq!(mime_for_path("Makefile"), "text/plain");
        assert_eq!(mime_for_path("src/trailing."), "text/plain");
    }

    #[test]
    fn test_extension_is_case_insensitive() {
        assert_eq!(mime_for_path("src/App.JS"), "application/javascript");
        assert_eq!(mime_for_path("styles/Main.Css"), "text/css");
    }

    #[test]
    fn test_dot_in_directory_is_not_an_extension() {
        assert_eq!(mime_for_path("node_modules/lodash.get/index"), "text/plain");
        assert_eq!(mime_for_path("node_modules/lodash.get/index.js"), "application/javascript");
    }
}
