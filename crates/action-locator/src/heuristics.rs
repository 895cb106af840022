//! Pure stability heuristics and escaping helpers.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::ElementDescriptor;

pub const TEST_ATTRIBUTES: &[&str] = &[
    "data-testid",
    "data-test",
    "data-cy",
    "data-automation-id",
    "data-qa",
    "data-test-id",
];

pub const FORM_ATTRIBUTES: &[&str] = &["name", "placeholder", "for", "type"];

pub const ARIA_ATTRIBUTES: &[&str] = &[
    "aria-label",
    "aria-labelledby",
    "aria-describedby",
    "aria-controls",
    "aria-expanded",
    "aria-selected",
];

pub const LANDMARK_TAGS: &[&str] = &[
    "main", "nav", "header", "footer", "section", "article", "aside", "form",
];

/// Tags whose text content is a reasonable accessible name for a path expression.
pub const TEXT_NAMED_TAGS: &[&str] = &["h1", "h2", "h3", "h4", "h5", "h6", "a", "button"];

pub const MAX_NAME_LEN: usize = 50;

static UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
        .expect("static regex")
});

static GENERATED_ID_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(radix-|headlessui-|react-aria|mui-|rc-|ember\d|yui_|ext-gen|ext-comp|gwt-uid|downshift-|reach-|chakra-|mantine-|__next|vue-|ng-|svelte-|:r)",
    )
    .expect("static regex")
});

static HASH_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[-_][0-9a-f]{6,}$").expect("static regex"));

static GENERATED_CLASS_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(css-|sc-|jsx-|emotion-|styled-|makeStyles-|jss\d|svelte-|ng-|_|data-v-)")
        .expect("static regex")
});

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{2,}").expect("static regex"));

fn mixes_letters_and_digits(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit()) && token.chars().any(|c| c.is_ascii_alphabetic())
}

/// True when an `id` looks framework- or runtime-generated and will not survive a reload.
pub fn is_dynamic_id(id: &str) -> bool {
    let id = id.trim();
    if id.is_empty() || id.contains(':') {
        return true;
    }
    if GENERATED_ID_PREFIX.is_match(id) || UUID.is_match(id) {
        return true;
    }
    if HASH_SUFFIX.is_match(id) && id.chars().any(|c| c.is_ascii_digit()) {
        return true;
    }
    // long opaque token without separators
    id.len() >= 12 && id.chars().all(|c| c.is_ascii_alphanumeric()) && mixes_letters_and_digits(id)
}

/// True when a class name looks generated (CSS-in-JS hashes, utility variants, framework state).
pub fn is_dynamic_class(class: &str) -> bool {
    let class = class.trim();
    if class.is_empty() || class.contains(':') || class.contains('[') || class.contains('/') {
        return true;
    }
    if GENERATED_CLASS_PREFIX.is_match(class) || DIGIT_RUN.is_match(class) {
        return true;
    }
    class.len() >= 6
        && class
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && mixes_letters_and_digits(class)
}

/// Up to two classes that pass [`is_dynamic_class`], in document order.
pub fn stable_classes(desc: &ElementDescriptor) -> Vec<&str> {
    desc.classes
        .iter()
        .map(String::as_str)
        .filter(|class| !is_dynamic_class(class))
        .take(2)
        .collect()
}

pub fn stable_id(desc: &ElementDescriptor) -> Option<&str> {
    desc.id
        .as_deref()
        .map(str::trim)
        .filter(|id| !is_dynamic_id(id))
}

/// Explicit `role`, else the role implied by the tag.
pub fn implicit_role(desc: &ElementDescriptor) -> Option<&str> {
    if let Some(role) = desc.explicit_role() {
        return Some(role);
    }
    let role = match desc.tag.as_str() {
        "button" => "button",
        "a" if desc.attr("href").is_some() => "link",
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => "heading",
        "input" => match desc.attr("type").unwrap_or("text") {
            "checkbox" => "checkbox",
            "radio" => "radio",
            "submit" | "button" | "reset" | "image" => "button",
            "range" => "slider",
            "search" => "searchbox",
            _ => "textbox",
        },
        "textarea" => "textbox",
        "select" => "combobox",
        "nav" => "navigation",
        "main" => "main",
        "img" => "img",
        "ul" | "ol" => "list",
        "li" => "listitem",
        "table" => "table",
        "dialog" => "dialog",
        _ => return None,
    };
    Some(role)
}

/// `aria-label`, else short single-line text content.
pub fn accessible_name(desc: &ElementDescriptor) -> Option<String> {
    if let Some(label) = desc.attr("aria-label") {
        return Some(label.to_string());
    }
    text_name(desc)
}

/// Whitespace-collapsed text content when short enough to anchor on.
pub fn text_name(desc: &ElementDescriptor) -> Option<String> {
    let text = desc.text.as_deref()?;
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty() && collapsed.chars().count() <= MAX_NAME_LEN).then_some(collapsed)
}

/// Escapes an identifier for use after `#` or `.` (the subset of `CSS.escape` we need).
pub fn css_escape_ident(ident: &str) -> String {
    let mut out = String::with_capacity(ident.len());
    let chars: Vec<char> = ident.chars().collect();
    for (idx, &c) in chars.iter().enumerate() {
        let leading_digit = c.is_ascii_digit()
            && (idx == 0 || (idx == 1 && chars[0] == '-'));
        if leading_digit {
            out.push_str(&format!("\\{:x} ", c as u32));
        } else if c.is_ascii_alphanumeric() || c == '-' || c == '_' || !c.is_ascii() {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

/// Double-quoted CSS attribute value.
pub fn css_attr_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\a "),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// XPath string literal, using `concat()` when both quote kinds appear.
pub fn xpath_literal(value: &str) -> String {
    if !value.contains('"') {
        return format!("\"{value}\"");
    }
    if !value.contains('\'') {
        return format!("'{value}'");
    }
    let parts: Vec<String> = value
        .split('"')
        .map(|part| format!("\"{part}\""))
        .collect();
    format!("concat({})", parts.join(", '\"', "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_ids() {
        for id in [
            "radix-:r3:",
            ":r1:",
            "headlessui-menu-button-7",
            "ember1234",
            "mui-42",
            "3f2504e0-4f89-11d3-9a0c-0305e82c3301",
            "a9f3k2l1m0n8b7",
            "card-7f3a9c2e",
            "react-aria-5",
        ] {
            assert!(is_dynamic_id(id), "{id} should be dynamic");
        }
        for id in ["login-button", "main", "search_input", "checkout", "navigation-menu-primary"] {
            assert!(!is_dynamic_id(id), "{id} should be stable");
        }
    }

    #[test]
    fn test_dynamic_classes() {
        for class in [
            "css-1x2y3z",
            "sc-bdVaJa",
            "jsx-2847264",
            "hover:bg-blue-500",
            "w-[320px]",
            "ng-star-inserted",
            "_button_1x2y3",
            "col-12",
            "e1k4j8h0",
        ] {
            assert!(is_dynamic_class(class), "{class} should be dynamic");
        }
        for class in ["btn", "btn-primary", "card__title", "navigation", "is-active"] {
            assert!(!is_dynamic_class(class), "{class} should be stable");
        }
    }

    #[test]
    fn test_stable_classes_take_two() {
        let desc = ElementDescriptor {
            tag: "div".into(),
            classes: vec!["css-abc123".into(), "card".into(), "shadow".into(), "wide".into()],
            ..Default::default()
        };
        assert_eq!(stable_classes(&desc), vec!["card", "shadow"]);
    }

    #[test]
    fn test_css_escaping() {
        assert_eq!(css_escape_ident("main-nav"), "main-nav");
        assert_eq!(css_escape_ident("a.b"), "a\\.b");
        assert_eq!(css_escape_ident("1st"), "\\31 st");
        assert_eq!(css_attr_value("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_xpath_literal_quoting() {
        assert_eq!(xpath_literal("Save"), "\"Save\"");
        assert_eq!(xpath_literal("Say \"hi\""), "'Say \"hi\"'");
        assert_eq!(
            xpath_literal("it's \"x\""),
            "concat(\"it's \", '\"', \"x\", '\"', \"\")"
        );
    }

    #[test]
    fn test_implicit_roles_and_names() {
        let link = ElementDescriptor {
            tag: "a".into(),
            attributes: [("href".to_string(), "/docs".to_string())].into(),
            text: Some("  Read\n the   docs ".into()),
            ..Default::default()
        };
        assert_eq!(implicit_role(&link), Some("link"));
        assert_eq!(accessible_name(&link).as_deref(), Some("Read the docs"));

        let long = ElementDescriptor {
            tag: "button".into(),
            text: Some("x".repeat(MAX_NAME_LEN + 1)),
            ..Default::default()
        };
        assert_eq!(accessible_name(&long), None);
    }
}
