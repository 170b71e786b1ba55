//! 通知模板渲染
//!
//! 支持 `{Token}` 语法，可用变量：
//! `{Title}` `{Author}` `{Summary}` `{FeedId}` `{RuleName}` `{Categories}`。
//!
//! ```ignore
//! let text = render("[{RuleName}] {Title} by {Author}", "urgent", &article);
//! // "[urgent] Server down by Ops"
//! ```

use crate::models::Article;
use regex::{Captures, Regex};
use std::sync::LazyLock;
use tracing::warn;

/// 匹配 {Token}，变量名支持字母、数字、下划线
static TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("token pattern is a valid regex"));

/// 渲染模板
///
/// 未知变量保留原样并记录警告日志；文章缺失的字段替换为空串。
pub fn render(template: &str, rule_name: &str, article: &Article) -> String {
    TOKEN_REGEX
        .replace_all(template, |caps: &Captures| {
            let token = &caps[1];
            match resolve(token, rule_name, article) {
                Some(value) => value,
                None => {
                    warn!(variable = token, rule_name, "模板变量未知，保留原样");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

fn resolve(token: &str, rule_name: &str, article: &Article) -> Option<String> {
    let text = |value: &Option<String>| value.clone().unwrap_or_default();

    Some(match token {
        "Title" => text(&article.title),
        "Author" => text(&article.author),
        "Summary" => text(&article.summary),
        "FeedId" => article.feed_id.to_string(),
        "RuleName" => rule_name.to_string(),
        "Categories" => article.categories.join(", "),
        _ => return None,
    })
}
