//! Page-context scripts.
//!
//! Element resolution (CSS, text, alt text, role) runs inside the page via
//! the embedded `locate.js` helper. Each builder wraps the helper and a small
//! body into one self-contained expression; arguments are JSON-encoded so
//! user-supplied text cannot break out of the script.

use serde::Serialize;

use crate::step::ElementLocator;

/// Embedded contents of `scripts/locate.js`.
pub const LOCATE_SCRIPT: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/scripts/locate.js"));

/// Synthetic DOM events used by forced interactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomEvent {
    Click,
    Hover,
}

fn json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

fn with_locator(locator: &ElementLocator, body: &str) -> String {
    format!(
        "(() => {{\n{LOCATE_SCRIPT}\nconst loc = {};\n{body}\n}})()",
        json(locator)
    )
}

/// Count, visibility, box, hit-test and scroll offsets for a locator.
pub fn probe_script(locator: &ElementLocator) -> String {
    with_locator(
        locator,
        "const { all, el } = __uv.target(loc);\n\
         const scroll = { x: window.scrollX, y: window.scrollY };\n\
         if (!el) return { count: all.length, found: false, visible: false, enabled: false, boundingBox: null, hitTarget: false, scroll };\n\
         return { count: all.length, found: true, visible: __uv.visible(el), enabled: !el.disabled, boundingBox: __uv.box(el), hitTarget: __uv.hitTarget(el), scroll };",
    )
}

/// Dispatch a DOM event on the target. Evaluates to `false` when absent.
pub fn dispatch_script(locator: &ElementLocator, event: DomEvent) -> String {
    let body = match event {
        DomEvent::Click => "el.click();",
        DomEvent::Hover => {
            "for (const type of ['pointerover', 'pointerenter', 'mouseover', 'mouseenter', 'mousemove']) {\n\
               el.dispatchEvent(new MouseEvent(type, { bubbles: type !== 'mouseenter' && type !== 'pointerenter', cancelable: true, view: window }));\n\
             }"
        }
    };
    with_locator(
        locator,
        &format!("const {{ el }} = __uv.target(loc);\nif (!el) return false;\n{body}\nreturn true;"),
    )
}

/// Scroll the target to the viewport centre. Evaluates to `false` when absent.
pub fn scroll_into_view_script(locator: &ElementLocator) -> String {
    with_locator(
        locator,
        "const { el } = __uv.target(loc);\n\
         if (!el) return false;\n\
         el.scrollIntoView({ block: 'center', inline: 'center' });\n\
         return true;",
    )
}

/// Move keyboard focus to the target. Evaluates to `false` when absent.
pub fn focus_script(locator: &ElementLocator) -> String {
    with_locator(
        locator,
        "const { el } = __uv.target(loc);\n\
         if (!el) return false;\n\
         if (typeof el.focus === 'function') el.focus();\n\
         return true;",
    )
}

/// Computed style value, or `null` when the target is absent.
pub fn computed_style_script(locator: &ElementLocator, property: &str) -> String {
    with_locator(
        locator,
        &format!(
            "const {{ el }} = __uv.target(loc);\n\
             if (!el) return null;\n\
             const prop = {};\n\
             const style = window.getComputedStyle(el);\n\
             return style.getPropertyValue(prop) || style[prop] || '';",
            json(property)
        ),
    )
}

/// Whether any element carrying `locator`'s matches is visible.
pub fn any_visible_script(locator: &ElementLocator) -> String {
    with_locator(
        locator,
        "return __uv.resolve(loc).some((el) => __uv.visible(el));",
    )
}

/// Client-side route change without a reload.
pub fn in_app_navigation_script(route: &str) -> String {
    format!(
        "(() => {{\n\
           const route = {};\n\
           const hashIndex = route.indexOf('#');\n\
           if (hashIndex >= 0) {{\n\
             window.location.hash = route.slice(hashIndex);\n\
           }} else {{\n\
             window.history.pushState({{}}, '', route);\n\
             window.dispatchEvent(new PopStateEvent('popstate', {{ state: {{}} }}));\n\
           }}\n\
           return window.location.href;\n\
         }})()",
        json(route)
    )
}

pub fn scroll_to_script(x: f64, y: f64) -> String {
    format!("(() => {{ window.scrollTo({x}, {y}); return [window.scrollX, window.scrollY]; }})()")
}

/// Document readiness state (`loading`, `interactive`, `complete`).
pub const READY_STATE_SCRIPT: &str = "document.readyState";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_script_exposes_helpers() {
        assert!(LOCATE_SCRIPT.contains("const __uv"));
        assert!(LOCATE_SCRIPT.contains("hitTarget"));
    }

    #[test]
    fn locator_is_json_encoded_into_script() {
        let locator = ElementLocator::text("it's \"quoted\"");
        let script = probe_script(&locator);
        assert!(script.contains(r#"const loc = {"kind":"text","text":"it's \"quoted\"","exact":false,"nth":0};"#));
        assert!(script.starts_with("(() => {"));
        assert!(script.ends_with("})()"));
    }

    #[test]
    fn dispatch_script_varies_by_event() {
        let locator = ElementLocator::css("button");
        assert!(dispatch_script(&locator, DomEvent::Click).contains("el.click();"));
        assert!(dispatch_script(&locator, DomEvent::Hover).contains("mouseover"));
    }

    #[test]
    fn computed_style_escapes_property() {
        let script = computed_style_script(&ElementLocator::css("img"), "max-height");
        assert!(script.contains(r#"const prop = "max-height";"#));
    }

    #[test]
    fn in_app_navigation_handles_hash_routes() {
        let script = in_app_navigation_script("/#/project/arduino-unity");
        assert!(script.contains(r##"const route = "/#/project/arduino-unity";"##));
        assert!(script.contains("window.location.hash"));
        assert!(script.contains("pushState"));
    }
}
