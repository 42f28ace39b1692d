//! License detection from LICENSE file contents.

/// Header fragments identifying common licenses, most specific first:
/// the first match wins, so `lgpl-2.1` must precede `lgpl-2.0`.
pub const LICENSE_MATCHERS: &[(&str, &str)] = &[
    ("agpl-1.0", "AFFERO GENERAL PUBLIC LICENSE Version 1"),
    ("agpl-2.0", "GNU AFFERO GENERAL PUBLIC LICENSE Version 2"),
    ("agpl-3.0", "GNU AFFERO GENERAL PUBLIC LICENSE Version 3"),
    ("lgpl-2.1", "GNU LESSER GENERAL PUBLIC LICENSE Version 2.1"),
    ("lgpl-2.0", "GNU LESSER GENERAL PUBLIC LICENSE Version 2"),
    ("lgpl-3.0", "GNU LESSER GENERAL PUBLIC LICENSE Version 3"),
    ("gpl-1.0", "GNU GENERAL PUBLIC LICENSE Version 1"),
    ("gpl-2.0", "GNU GENERAL PUBLIC LICENSE Version 2"),
    ("gpl-3.0", "GNU GENERAL PUBLIC LICENSE Version 3"),
    ("cpl-1.0", "PROVIDED UNDER THE TERMS OF THIS COMMON PUBLIC LICENSE"),
    ("apache-1.0", "1995-1999 The Apache Group"),
    ("apache-1.1", "The Apache Software License, Version 1.1"),
    ("apache-2.0", "Apache License Version 2.0"),
    ("unlicense", "unlicense.org"),
    ("mit", "MIT License"),
    ("mpl-1.0", "Mozilla Public License Version 1.0"),
    ("mpl-1.1", "Mozilla Public License Version 1.1"),
    ("mpl-2.0", "Mozilla Public License Version 2.0"),
    ("bsl-1.0", "Boost Software License - Version 1.0"),
    ("zlib", "zlib License"),
    ("afl-3.0", "Academic Free License (\"AFL\") v. 3.0"),
    ("artistic-2.0", "The Artistic License 2.0"),
    ("bsd-2-clause", "BSD 2-Clause License"),
    ("bsd-3-clause-clear", "The Clear BSD License"),
    ("bsd-3-clause", "BSD 3-Clause License"),
    ("bsd-4-clause", "BSD 4-Clause License"),
    ("cc-by-4.0", "Creative Commons Attribution 4.0"),
    ("cc-by-sa-4.0", "Attribution-ShareAlike 4.0 International"),
    ("cc0-1.0", "CC0 1.0 Universal"),
    ("cecill-2.1", "CONTRAT DE LICENCE DE LOGICIEL LIBRE CeCILL"),
    ("ecl-2.0", "Educational Community License"),
    ("epl-1.0", "Eclipse Public License - v 1.0"),
    ("epl-2.0", "Eclipse Public License - v 2.0"),
    ("eupl-1.2", "EUROPEAN UNION PUBLIC LICENCE v. 1.2"),
    ("eupl-1.1", "Licensed under the EUPL V.1.1"),
    ("isc", "ISC License"),
    ("lppl-1.3c", "LPPL Version 1.3c"),
    ("ms-pl", "Microsoft Public License (Ms-PL)"),
    ("ms-rl", "Microsoft Reciprocal License (Ms-RL)"),
    ("ncsa", "University of Illinois/NCSA Open Source License"),
    ("odbl-1.0", "ODC Open Database License (ODbL)"),
    ("osl-3.0", "Open Software License (\"OSL\") v. 3.0"),
    ("postgresql", "PostgreSQL License"),
    ("upl-1.0", "The Universal Permissive License (UPL), Version 1.0"),
    ("vim", "VIM LICENSE"),
    ("rpsl-1.0", "RealNetworks Public Source License Version 1.0"),
    ("apsl-2.0", "APPLE PUBLIC SOURCE LICENSE Version 2.0"),
    (
        "neongecko",
        "Friendly Licensing: No charge, open source royalty free use of the Neon AI software source",
    ),
];

const MIT_BODY: &str = "Permission is hereby granted, free of charge, to any person obtaining a copy of this software and associated documentation files (the \"Software\"), to deal in the Software without restriction, including without limitation the rights to use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of the Software, and to permit persons to whom the Software is furnished to do so, subject to the following conditions: The above copyright notice and this permission notice shall be included in all copies or substantial portions of the Software. THE SOFTWARE IS PROVIDED \"AS IS\", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.";

const ISC_BODY: &str = "Permission to use, copy, modify, and/or distribute this software for any purpose with or without fee is hereby granted, provided that the above copyright notice and this permission notice appear in all copies. THE SOFTWARE IS PROVIDED \"AS IS\" AND THE AUTHOR DISCLAIMS ALL WARRANTIES WITH REGARD TO THIS SOFTWARE INCLUDING ALL IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS. IN NO EVENT SHALL THE AUTHOR BE LIABLE FOR ANY SPECIAL, DIRECT, INDIRECT, OR CONSEQUENTIAL DAMAGES OR ANY DAMAGES WHATSOEVER RESULTING FROM LOSS OF USE, DATA OR PROFITS, WHETHER IN AN ACTION OF CONTRACT, NEGLIGENCE OR OTHER TORTIOUS ACTION, ARISING OUT OF OR IN CONNECTION WITH THE USE OR PERFORMANCE OF THIS SOFTWARE.";

/// 0BSD is ISC without the "and/or".
const ZERO_BSD_BODY: &str = "Permission to use, copy, modify, and distribute this software for any purpose with or without fee is hereby granted, provided that the above copyright notice and this permission notice appear in all copies. THE SOFTWARE IS PROVIDED \"AS IS\" AND THE AUTHOR DISCLAIMS ALL WARRANTIES WITH REGARD TO THIS SOFTWARE INCLUDING ALL IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS. IN NO EVENT SHALL THE AUTHOR BE LIABLE FOR ANY SPECIAL, DIRECT, INDIRECT, OR CONSEQUENTIAL DAMAGES OR ANY DAMAGES WHATSOEVER RESULTING FROM LOSS OF USE, DATA OR PROFITS, WHETHER IN AN ACTION OF CONTRACT, NEGLIGENCE OR OTHER TORTIOUS ACTION, ARISING OUT OF OR IN CONNECTION WITH THE USE OR PERFORMANCE OF THIS SOFTWARE.";

/// Guess a license key from LICENSE text.
///
/// Known headers in the first 30 lines win; otherwise the unheaded MIT, ISC
/// and 0BSD bodies are recognized; otherwise the first non-empty line is
/// returned as-is. Blank input gives `None`.
pub fn detect_license(text: &str) -> Option<String> {
    let header: String = text
        .lines()
        .take(30)
        .collect::<String>()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();

    for (key, matcher) in LICENSE_MATCHERS {
        let needle: String = matcher
            .to_lowercase()
            .chars()
            .filter(|c| *c != ' ' && *c != ',')
            .collect();
        if header.contains(&needle) {
            return Some((*key).to_string());
        }
    }

    for (key, body) in [("isc", ISC_BODY), ("0bsd", ZERO_BSD_BODY), ("mit", MIT_BODY)] {
        if matches_template(text, body) {
            return Some(key.to_string());
        }
    }

    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// Permissive licenses impose no copyleft obligations.
pub fn is_permissive(license: &str) -> bool {
    matches!(license, "mit" | "apache-2.0" | "unlicense" | "0bsd" | "isc")
}

/// Copyleft licenses that constrain derived works.
pub fn is_viral(license: &str) -> bool {
    matches!(
        license,
        "agpl-1.0"
            | "agpl-2.0"
            | "agpl-3.0"
            | "lgpl-2.0"
            | "lgpl-2.1"
            | "lgpl-3.0"
            | "gpl-1.0"
            | "gpl-2.0"
            | "gpl-3.0"
            | "epl-1.0"
            | "epl-2.0"
            | "cpl-1.0"
    )
}

/// Compare letters only, tolerating leading copyright lines.
fn matches_template(text: &str, template: &str) -> bool {
    let letters = |s: &str| -> String {
        s.chars()
            .filter(char::is_ascii_alphabetic)
            .map(|c| c.to_ascii_lowercase())
            .collect()
    };
    let wanted = letters(template);
    let mut lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    loop {
        if letters(&lines.join("\n")) == wanted {
            return true;
        }
        match lines.first() {
            Some(first) if first.to_lowercase().contains("copyright") => {
                lines.remove(0);
            }
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_headers() {
        assert_eq!(
            detect_license("                    Apache License\n              Version 2.0, January 2004\n").as_deref(),
            Some("apache-2.0")
        );
        assert_eq!(
            detect_license("GNU GENERAL PUBLIC LICENSE\nVersion 3, 29 June 2007").as_deref(),
            Some("gpl-3.0")
        );
        assert_eq!(
            detect_license("GNU LESSER GENERAL PUBLIC LICENSE\nVersion 2.1, February 1999").as_deref(),
            Some("lgpl-2.1")
        );
    }

    #[test]
    fn detects_unheaded_mit_with_copyright() {
        let text = format!("Copyright (c) 2021 Someone\n\n{MIT_BODY}\n");
        assert_eq!(detect_license(&text).as_deref(), Some("mit"));
    }

    #[test]
    fn falls_back_to_first_line() {
        assert_eq!(
            detect_license("\n  Custom Terms v2\nmore").as_deref(),
            Some("Custom Terms v2")
        );
        assert_eq!(detect_license("  \n\n"), None);
    }

    #[test]
    fn classification() {
        assert!(is_permissive("mit"));
        assert!(!is_permissive("gpl-3.0"));
        assert!(is_viral("gpl-3.0"));
        assert!(!is_viral("apache-2.0"));
    }
}
