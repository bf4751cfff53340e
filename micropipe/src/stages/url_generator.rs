use crate::pipeline::{Emitter, ItemHandler, StageOptions};
use async_trait::async_trait;
use micropipe_shared::{FlowValue, PipelineError, PipelineResult};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::Debug;

const PLACEHOLDER_PATTERN: &str = r"\{[A-Za-z0-9_-]+\}";

/// Builds one URL per value from a template.
///
/// Each `{key}` placeholder is replaced by the parameter of the same name.
/// Parameters no placeholder consumed are URL-encoded into a query string;
/// placeholders without a parameter are left as they are.
pub struct UrlGenerator<I, P> {
    template: String,
    placeholders: Vec<String>,
    params: P,
    options: StageOptions<String>,
    _input: std::marker::PhantomData<fn(I)>,
}

impl<I, P> UrlGenerator<I, P>
where
    P: Fn(&FlowValue<I>) -> BTreeMap<String, String>,
{
    pub fn new(template: impl Into<String>, params: P) -> PipelineResult<Self> {
        let template = template.into();
        let pattern = Regex::new(PLACEHOLDER_PATTERN)
            .map_err(|e| PipelineError::Config(format!("invalid placeholder pattern: {}", e)))?;
        let placeholders = pattern
            .find_iter(&template)
            .map(|m| m.as_str().to_string())
            .collect();

        Ok(Self {
            template,
            placeholders,
            params,
            options: StageOptions::default(),
            _input: std::marker::PhantomData,
        })
    }

    pub fn render(&self, item: &FlowValue<I>) -> String {
        let mut params = (self.params)(item);
        let mut url = self.template.clone();

        for placeholder in &self.placeholders {
            let key = &placeholder[1..placeholder.len() - 1];
            if let Some(value) = params.remove(key) {
                url = url.replace(placeholder.as_str(), &value);
            }
        }

        if !params.is_empty() {
            let query = params
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            url = format!("{}?{}", url, query);
        }
        url
    }
}

#[async_trait]
impl<I, P> ItemHandler for UrlGenerator<I, P>
where
    I: Debug + Send + Sync + 'static,
    P: Fn(&FlowValue<I>) -> BTreeMap<String, String> + Send + Sync + 'static,
{
    type Input = I;
    type Output = String;

    fn kind(&self) -> &'static str {
        "UrlGenerator"
    }

    fn options(&self) -> &StageOptions<String> {
        &self.options
    }

    fn options_mut(&mut self) -> &mut StageOptions<String> {
        &mut self.options
    }

    async fn handle(&self, item: &FlowValue<I>, out: &Emitter<String>) -> PipelineResult<bool> {
        let url = self.render(item);
        out.emit(url, item.meta.clone()).await?;
        Ok(true)
    }
}
