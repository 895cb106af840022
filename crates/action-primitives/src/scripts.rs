//! Page functions used by the executor. Element functions run with `this` bound to the target.

/// Finds the nearest scrollable ancestor of the element at a point and scrolls it,
/// falling back to the viewport. Returns `"window"` or `tag#id`.
pub const SCROLL_AT_POINT: &str = r#"(x, y, dx, dy) => {
  const canScroll = (el) => {
    const style = getComputedStyle(el);
    const vertical = /(auto|scroll|overlay)/.test(style.overflowY) && el.scrollHeight > el.clientHeight;
    const horizontal = /(auto|scroll|overlay)/.test(style.overflowX) && el.scrollWidth > el.clientWidth;
    return (dy !== 0 && vertical) || (dx !== 0 && horizontal);
  };
  let el = document.elementFromPoint(x, y);
  while (el && el !== document.body && el !== document.documentElement) {
    if (canScroll(el)) {
      el.scrollBy(dx, dy);
      return el.tagName.toLowerCase() + (el.id ? '#' + el.id : '');
    }
    el = el.parentElement;
  }
  window.scrollBy(dx, dy);
  return 'window';
}"#;

pub const SCROLL_INTO_VIEW: &str = r#"function() {
  this.scrollIntoView({ behavior: 'auto', block: 'center', inline: 'center' });
  return true;
}"#;

pub const SCROLL_TO_PERCENT: &str = r#"function(percent) {
  if (this === document.body || this === document.documentElement) {
    const max = document.documentElement.scrollHeight - window.innerHeight;
    window.scrollTo({ top: max * percent / 100, left: window.scrollX, behavior: 'auto' });
    return 'window';
  }
  const max = this.scrollHeight - this.clientHeight;
  this.scrollTo({ top: max * percent / 100, left: this.scrollLeft, behavior: 'auto' });
  return this.tagName.toLowerCase() + (this.id ? '#' + this.id : '');
}"#;

pub const SCROLL_CHUNK: &str = r#"function(direction) {
  const root = this === document.body || this === document.documentElement;
  const scrollable = !root
    && /(auto|scroll|overlay)/.test(getComputedStyle(this).overflowY)
    && this.scrollHeight > this.clientHeight;
  if (!scrollable) {
    window.scrollBy({ top: direction * window.innerHeight, behavior: 'auto' });
    return 'window';
  }
  this.scrollBy({ top: direction * this.clientHeight, behavior: 'auto' });
  return this.tagName.toLowerCase() + (this.id ? '#' + this.id : '');
}"#;

pub const CLEAR_AND_FOCUS: &str = r#"function() {
  this.scrollIntoView({ block: 'center', inline: 'center' });
  this.focus();
  if (this.isContentEditable) {
    this.textContent = '';
  } else if ('value' in this) {
    this.value = '';
  }
  this.dispatchEvent(new Event('input', { bubbles: true }));
  return true;
}"#;

/// Viewport centre of the element after scrolling it into view; `null` when it has no box.
pub const CENTER_POINT: &str = r#"function() {
  this.scrollIntoView({ block: 'center', inline: 'center' });
  const rect = this.getBoundingClientRect();
  if (rect.width === 0 && rect.height === 0) return null;
  return { x: rect.left + rect.width / 2, y: rect.top + rect.height / 2 };
}"#;

/// Selects the option whose value, label or text equals the argument.
pub const SELECT_OPTION: &str = r#"function(value) {
  if (!(this instanceof HTMLSelectElement)) return false;
  const option = Array.from(this.options).find(
    (o) => o.value === value || o.label === value || o.text.trim() === value);
  if (!option) return false;
  this.value = option.value;
  this.dispatchEvent(new Event('input', { bubbles: true }));
  this.dispatchEvent(new Event('change', { bubbles: true }));
  return true;
}"#;

pub fn scroll_at_point_expression(x: f64, y: f64, dx: f64, dy: f64) -> String {
    format!("({SCROLL_AT_POINT})({x}, {y}, {dx}, {dy})")
}

/// Expression evaluating to the first element matching a CSS selector or XPath.
pub fn element_lookup_expression(locator: &str, xpath: bool) -> String {
    let literal = serde_json::Value::String(locator.to_string());
    if xpath {
        format!(
            "document.evaluate({literal}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue"
        )
    } else {
        format!("document.querySelector({literal})")
    }
}
