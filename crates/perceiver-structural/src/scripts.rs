//! In-page functions used during enrichment.

/// Bound to an element via `Runtime.callFunctionOn`; returns its absolute XPath.
pub const NODE_PATH_FUNCTION: &str = r#"function() {
  let current = this;
  if (!current || (current.nodeType !== Node.ELEMENT_NODE && current.nodeType !== Node.TEXT_NODE)) {
    return "";
  }
  const parts = [];
  while (current && (current.nodeType === Node.ELEMENT_NODE || current.nodeType === Node.TEXT_NODE)) {
    if (!current.parentNode) break;
    const name = current.nodeName.toLowerCase();
    if (name === "html") {
      parts.unshift("html");
      break;
    }
    if (current.nodeType === Node.ELEMENT_NODE) {
      const parent = current.parentElement;
      const sameType = parent
        ? Array.from(parent.children).filter((el) => el.nodeName === current.nodeName)
        : [];
      const index = sameType.indexOf(current) + 1;
      parts.unshift(sameType.length > 1 ? `${name}[${index}]` : name);
    }
    current = current.parentElement;
  }
  return parts.length ? `/${parts.join("/")}` : "";
}"#;

pub const TAG_NAME_FUNCTION: &str =
    "function() { return this.tagName ? this.tagName.toLowerCase() : \"\"; }";

/// Lists XPaths of elements whose content overflows and can be scrolled.
pub const SCROLLABLE_XPATHS_EXPRESSION: &str = r#"(() => {
  const pathOf = (el) => {
    const parts = [];
    let current = el;
    while (current && current.nodeType === Node.ELEMENT_NODE) {
      const name = current.nodeName.toLowerCase();
      if (name === "html") { parts.unshift("html"); break; }
      const parent = current.parentElement;
      const sameType = parent
        ? Array.from(parent.children).filter((c) => c.nodeName === current.nodeName)
        : [];
      parts.unshift(sameType.length > 1 ? `${name}[${sameType.indexOf(current) + 1}]` : name);
      current = parent;
    }
    return `/${parts.join("/")}`;
  };
  const canScroll = (el) => {
    const style = window.getComputedStyle(el);
    const overflow = `${style.overflowY} ${style.overflowX}`;
    const allows = /(auto|scroll|overlay)/.test(overflow);
    return allows && (el.scrollHeight > el.clientHeight || el.scrollWidth > el.clientWidth);
  };
  const found = [];
  const root = document.scrollingElement || document.documentElement;
  if (root && root.scrollHeight > root.clientHeight) found.push(root);
  for (const el of document.querySelectorAll("body *")) {
    if (canScroll(el)) found.push(el);
  }
  found.sort((a, b) => b.scrollHeight - a.scrollHeight);
  return found.map(pathOf);
})()"#;

/// Expression resolving an XPath to its first matching node.
pub fn xpath_lookup_expression(xpath: &str) -> Result<String, serde_json::Error> {
    let literal = serde_json::to_string(xpath)?;
    Ok(format!(
        "(() => {{ try {{ return document.evaluate({literal}, document, null, \
         XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue; }} catch (e) {{ return null; }} }})()"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_expression_quotes_xpath() {
        let expr = xpath_lookup_expression("/html/body/div[@id=\"a\"]").unwrap();
        assert!(expr.contains(r#""/html/body/div[@id=\"a\"]""#));
        assert!(expr.starts_with("(() =>"));
    }
}
