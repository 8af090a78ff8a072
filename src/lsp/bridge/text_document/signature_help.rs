//! Signature help.

use tower_lsp_server::ls_types::{
    Documentation as LspDocumentation, ParameterInformation, ParameterLabel, SignatureInformation,
};

use super::super::ProtocolBridge;
use super::super::protocol::{self, PositionParams, Suggestion, parse_suggestions};
use super::{markdown, render_documentation};
use crate::error::{BridgeError, BridgeResult};
use crate::lsp::rewriter::rewrite;

fn to_signature(suggestion: &Suggestion) -> SignatureInformation {
    let parameters = suggestion
        .arguments
        .iter()
        .map(|argument| ParameterInformation {
            label: ParameterLabel::Simple(argument.clone()),
            documentation: None,
        })
        .collect::<Vec<_>>();

    SignatureInformation {
        label: format!("{}({})", suggestion.label, suggestion.arguments.join(", ")),
        documentation: render_documentation(suggestion)
            .map(|doc| LspDocumentation::MarkupContent(markdown(rewrite(&doc).into_owned()))),
        parameters: (!parameters.is_empty()).then_some(parameters),
        active_parameter: None,
    }
}

impl ProtocolBridge {
    /// One signature per overload the backend reports.
    pub async fn signature_help(
        &self,
        params: &PositionParams,
    ) -> BridgeResult<Vec<SignatureInformation>> {
        let result = self.request(protocol::SIGNIFY, params.to_value()).await?;
        let suggestions = parse_suggestions(&result)
            .map_err(|message| BridgeError::request_failed(protocol::SIGNIFY, message))?;
        Ok(suggestions.iter().map(to_signature).collect())
    }
}
