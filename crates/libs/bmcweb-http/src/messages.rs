//! Redfish Base registry messages.
//!
//! Each helper sets the status of a [`Response`] and appends the message to
//! its `error` object. The first message fills `code` and `message`; any
//! further message turns them into the generic `GeneralError`.

use http::StatusCode;
use serde_json::{Value, json};
use tracing::error;

use crate::response::Response;

/// Prefix of every Base registry message id.
pub const MESSAGE_VERSION_PREFIX: &str = "Base.1.13.0.";

/// Key holding the list of messages.
pub const MESSAGE_ANNOTATION: &str = "@Message.ExtendedInfo";

struct MessageEntry {
    id: &'static str,
    message: &'static str,
    severity: &'static str,
    resolution: &'static str,
}

const GENERAL_ERROR: MessageEntry = MessageEntry {
    id: "GeneralError",
    message: "A general error has occurred. See Resolution for information on how to resolve the error.",
    severity: "Critical",
    resolution: "None.",
};

const INTERNAL_ERROR: MessageEntry = MessageEntry {
    id: "InternalError",
    message: "The request failed due to an internal service error.  The service is still operational.",
    severity: "Critical",
    resolution: "Resubmit the request.  If the problem persists, consider resetting the service.",
};

const MALFORMED_JSON: MessageEntry = MessageEntry {
    id: "MalformedJSON",
    message: "The request body submitted was malformed JSON and could not be parsed by the receiving service.",
    severity: "Critical",
    resolution: "Ensure that the request body is valid JSON and resubmit the request.",
};

const RESOURCE_NOT_FOUND: MessageEntry = MessageEntry {
    id: "ResourceNotFound",
    message: "The requested resource of type %1 named '%2' was not found.",
    severity: "Critical",
    resolution: "Provide a valid resource identifier and resubmit the request.",
};

const INSUFFICIENT_PRIVILEGE: MessageEntry = MessageEntry {
    id: "InsufficientPrivilege",
    message: "There are insufficient privileges for the account or credentials associated with the current session to perform the requested operation.",
    severity: "Critical",
    resolution: "Either abandon the operation or change the associated access rights and resubmit the request if the operation failed.",
};

const NO_VALID_SESSION: MessageEntry = MessageEntry {
    id: "NoValidSession",
    message: "There is no valid session established with the implementation.",
    severity: "Critical",
    resolution: "Establish a session before attempting any operations.",
};

const OPERATION_NOT_ALLOWED: MessageEntry = MessageEntry {
    id: "OperationNotAllowed",
    message: "The HTTP method is not allowed on this resource.",
    severity: "Critical",
    resolution: "None.",
};

const PROPERTY_MISSING: MessageEntry = MessageEntry {
    id: "PropertyMissing",
    message: "The property %1 is a required property and must be included in the request.",
    severity: "Warning",
    resolution: "Ensure that the property is in the request body and has a valid value and resubmit the request if the operation failed.",
};

const SERVICE_TEMPORARILY_UNAVAILABLE: MessageEntry = MessageEntry {
    id: "ServiceTemporarilyUnavailable",
    message: "The service is temporarily unavailable.  Retry in %1 seconds.",
    severity: "Critical",
    resolution: "Wait for the indicated retry duration and retry the operation.",
};

const RESOURCE_AT_URI_UNAUTHORIZED: MessageEntry = MessageEntry {
    id: "ResourceAtUriUnauthorized",
    message: "While accessing the resource at '%1', the service received an authorization error '%2'.",
    severity: "Critical",
    resolution: "Ensure that the appropriate access is provided for the service in order for it to access the URI.",
};

const RESOURCE_MISSING_AT_URI: MessageEntry = MessageEntry {
    id: "ResourceMissingAtURI",
    message: "The resource at the URI '%1' was not found.",
    severity: "Critical",
    resolution: "Place a valid resource at the URI or correct the URI and resubmit the request.",
};

const PAYLOAD_TOO_LARGE: MessageEntry = MessageEntry {
    id: "PayloadTooLarge",
    message: "The supplied payload exceeds the maximum size supported by the service.",
    severity: "Critical",
    resolution: "Correct the request body and resubmit the request if the operation failed.",
};

const ACTION_PARAMETER_VALUE_NOT_IN_LIST: MessageEntry = MessageEntry {
    id: "ActionParameterValueNotInList",
    message: "The value '%1' for the parameter %2 in the action %3 is not in the list of acceptable values.",
    severity: "Warning",
    resolution: "Choose a value from the enumeration list that the implementation can support and resubmit the request if the operation failed.",
};

fn get_log(entry: &MessageEntry, args: &[&str]) -> Value {
    let mut message = entry.message.to_string();
    for (i, arg) in args.iter().enumerate() {
        message = message.replace(&format!("%{}", i + 1), arg);
    }
    json!({
        "@odata.type": "#Message.v1_1_1.Message",
        "MessageId": format!("{MESSAGE_VERSION_PREFIX}{}", entry.id),
        "Message": message,
        "MessageArgs": args,
        "MessageSeverity": entry.severity,
        "Resolution": entry.resolution,
    })
}

/// Appends `message` to the `error` object of `target`.
pub fn add_message_to_error_json(target: &mut Value, message: Value) {
    if !target.is_object() {
        *target = json!({});
    }
    let Some(root) = target.as_object_mut() else {
        return;
    };

    let error = root.entry("error").or_insert(Value::Null);
    if let Value::Object(existing) = &mut *error {
        existing.insert(
            "code".to_string(),
            json!(format!("{MESSAGE_VERSION_PREFIX}{}", GENERAL_ERROR.id)),
        );
        existing.insert("message".to_string(), json!(GENERAL_ERROR.message));
    } else {
        let (Some(id), Some(text)) = (message.get("MessageId"), message.get("Message")) else {
            error!("Attempt to add error message without MessageId or Message");
            return;
        };
        *error = json!({ "code": id, "message": text });
    }

    if let Some(Value::Array(list)) = error
        .as_object_mut()
        .map(|error| error.entry(MESSAGE_ANNOTATION).or_insert_with(|| json!([])))
    {
        list.push(message);
    }
}

fn fail(res: &mut Response, status: StatusCode, message: Value) {
    res.set_status(status);
    add_message_to_error_json(res.json_mut(), message);
}

pub fn internal_error(res: &mut Response) {
    fail(res, StatusCode::INTERNAL_SERVER_ERROR, get_log(&INTERNAL_ERROR, &[]));
}

pub fn malformed_json(res: &mut Response) {
    fail(res, StatusCode::BAD_REQUEST, get_log(&MALFORMED_JSON, &[]));
}

pub fn resource_not_found(res: &mut Response, kind: &str, name: &str) {
    fail(
        res,
        StatusCode::NOT_FOUND,
        get_log(&RESOURCE_NOT_FOUND, &[kind, name]),
    );
}

pub fn resource_missing_at_uri(res: &mut Response, uri: &str) {
    fail(
        res,
        StatusCode::NOT_FOUND,
        get_log(&RESOURCE_MISSING_AT_URI, &[uri]),
    );
}

pub fn insufficient_privilege(res: &mut Response) {
    fail(res, StatusCode::FORBIDDEN, get_log(&INSUFFICIENT_PRIVILEGE, &[]));
}

pub fn no_valid_session(res: &mut Response) {
    fail(res, StatusCode::UNAUTHORIZED, get_log(&NO_VALID_SESSION, &[]));
}

pub fn operation_not_allowed(res: &mut Response) {
    fail(
        res,
        StatusCode::METHOD_NOT_ALLOWED,
        get_log(&OPERATION_NOT_ALLOWED, &[]),
    );
}

pub fn property_missing(res: &mut Response, property: &str) {
    fail(
        res,
        StatusCode::BAD_REQUEST,
        get_log(&PROPERTY_MISSING, &[property]),
    );
}

pub fn service_temporarily_unavailable(res: &mut Response, retry_after: &str) {
    res.add_header(http::header::RETRY_AFTER, retry_after);
    fail(
        res,
        StatusCode::SERVICE_UNAVAILABLE,
        get_log(&SERVICE_TEMPORARILY_UNAVAILABLE, &[retry_after]),
    );
}

pub fn resource_at_uri_unauthorized(res: &mut Response, uri: &str, message: &str) {
    fail(
        res,
        StatusCode::UNAUTHORIZED,
        get_log(&RESOURCE_AT_URI_UNAUTHORIZED, &[uri, message]),
    );
}

pub fn action_parameter_value_not_in_list(
    res: &mut Response,
    value: &str,
    parameter: &str,
    action: &str,
) {
    fail(
        res,
        StatusCode::BAD_REQUEST,
        get_log(&ACTION_PARAMETER_VALUE_NOT_IN_LIST, &[value, parameter, action]),
    );
}

pub fn payload_too_large(res: &mut Response) {
    fail(res, StatusCode::PAYLOAD_TOO_LARGE, get_log(&PAYLOAD_TOO_LARGE, &[]));
}

/// Generic body for an error status that carries no body of its own.
pub fn default_error_body(status: StatusCode) -> Value {
    let message = match status {
        StatusCode::UNAUTHORIZED => get_log(&NO_VALID_SESSION, &[]),
        StatusCode::FORBIDDEN => get_log(&INSUFFICIENT_PRIVILEGE, &[]),
        StatusCode::METHOD_NOT_ALLOWED => get_log(&OPERATION_NOT_ALLOWED, &[]),
        StatusCode::PAYLOAD_TOO_LARGE => get_log(&PAYLOAD_TOO_LARGE, &[]),
        StatusCode::SERVICE_UNAVAILABLE => get_log(&SERVICE_TEMPORARILY_UNAVAILABLE, &["30"]),
        status if status.is_server_error() => get_log(&INTERNAL_ERROR, &[]),
        _ => get_log(&GENERAL_ERROR, &[]),
    };
    let mut body = json!({});
    add_message_to_error_json(&mut body, message);
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_message_sets_code() {
        let mut res = Response::new();
        resource_not_found(&mut res, "Manager", "bmc1");
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let error = &res.json()["error"];
        assert_eq!(error["code"], "Base.1.13.0.ResourceNotFound");
        assert_eq!(
            error["message"],
            "The requested resource of type Manager named 'bmc1' was not found."
        );
        assert_eq!(error[MESSAGE_ANNOTATION][0]["MessageArgs"], json!(["Manager", "bmc1"]));
    }

    #[test]
    fn second_message_becomes_general_error() {
        let mut res = Response::new();
        property_missing(&mut res, "UserName");
        property_missing(&mut res, "Password");

        let error = &res.json()["error"];
        assert_eq!(error["code"], "Base.1.13.0.GeneralError");
        assert_eq!(error[MESSAGE_ANNOTATION].as_array().unwrap().len(), 2);
    }

    #[test]
    fn unavailable_sets_retry_after() {
        let mut res = Response::new();
        service_temporarily_unavailable(&mut res, "30");
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(res.header(http::header::RETRY_AFTER), Some("30"));
    }

    #[test]
    fn default_bodies() {
        let body = default_error_body(StatusCode::FORBIDDEN);
        assert_eq!(body["error"]["code"], "Base.1.13.0.InsufficientPrivilege");
        let body = default_error_body(StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "Base.1.13.0.InternalError");
    }
}
