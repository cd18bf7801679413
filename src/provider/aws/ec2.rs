//! Compute adapter: images, instances, key pairs, and security groups.

use std::ffi::OsString;
use std::net::IpAddr;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{AwsCli, failure_names, os_args};
use crate::exec::CommandRunner;
use crate::provider::{
    Compute, ImageSummary, InstanceDescription, InstanceLaunchSpec, KeyPairMaterial,
    ProviderError,
};

const MISSING_IMAGE_MARKERS: &[&str] = &["InvalidAMIID.NotFound", "InvalidAMIID.Unavailable"];
const MISSING_INSTANCE_MARKERS: &[&str] = &["InvalidInstanceID.NotFound"];

/// Compute operations implemented over `aws ec2`.
#[derive(Clone, Debug)]
pub struct AwsCompute<R: CommandRunner> {
    cli: AwsCli<R>,
}

impl<R: CommandRunner> AwsCompute<R> {
    /// Creates the adapter around a CLI wrapper.
    #[must_use]
    pub const fn new(cli: AwsCli<R>) -> Self {
        Self { cli }
    }

    fn describe_images(
        &self,
        args: &[OsString],
        region: &str,
    ) -> Result<Vec<ImageSummary>, ProviderError> {
        let response: DescribeImagesResponse = self.cli.run_json(region, args, "images")?;
        Ok(response.images.into_iter().map(ImageSummary::from).collect())
    }
}

impl<R: CommandRunner> Compute for AwsCompute<R> {
    fn find_image(
        &self,
        name: &str,
        region: &str,
    ) -> Result<Option<ImageSummary>, ProviderError> {
        let args = os_args(&[
            "ec2",
            "describe-images",
            "--filters",
            &format!("Name=name,Values={name}"),
            "--include-deprecated",
        ]);
        let mut images = self.describe_images(&args, region)?;
        Ok(if images.is_empty() {
            None
        } else {
            Some(images.remove(0))
        })
    }

    fn list_images(
        &self,
        name_prefix: &str,
        region: &str,
    ) -> Result<Vec<ImageSummary>, ProviderError> {
        let args = os_args(&[
            "ec2",
            "describe-images",
            "--owners",
            "self",
            "--filters",
            &format!("Name=name,Values={name_prefix}*"),
        ]);
        self.describe_images(&args, region)
    }

    fn latest_base_image(
        &self,
        name_pattern: &str,
        owner: &str,
        region: &str,
    ) -> Result<ImageSummary, ProviderError> {
        let args = os_args(&[
            "ec2",
            "describe-images",
            "--owners",
            owner,
            "--filters",
            &format!("Name=name,Values={name_pattern}"),
            &format!("Name=owner-alias,Values={owner}"),
            "Name=state,Values=available",
        ]);
        let mut images = self.describe_images(&args, region)?;
        images.sort_by(|lhs, rhs| rhs.created_at.cmp(&lhs.created_at));
        if images.is_empty() {
            return Err(ProviderError::Missing {
                what: format!("base image matching {name_pattern} in {region}"),
            });
        }
        Ok(images.remove(0))
    }

    fn copy_image(
        &self,
        name: &str,
        source_image_id: &str,
        source_region: &str,
        dest_region: &str,
    ) -> Result<String, ProviderError> {
        let args = os_args(&[
            "ec2",
            "copy-image",
            "--name",
            name,
            "--source-image-id",
            source_image_id,
            "--source-region",
            source_region,
        ]);
        let response: ImageIdResponse = self.cli.run_json(dest_region, &args, "image copy")?;
        Ok(response.image_id)
    }

    fn image_state(
        &self,
        image_id: &str,
        region: &str,
    ) -> Result<Option<String>, ProviderError> {
        let args = os_args(&["ec2", "describe-images", "--image-ids", image_id]);
        match self.describe_images(&args, region) {
            Ok(mut images) => Ok(if images.is_empty() {
                None
            } else {
                Some(images.remove(0).state)
            }),
            Err(err) if failure_names(&err, MISSING_IMAGE_MARKERS) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn deregister_image(&self, image_id: &str, region: &str) -> Result<(), ProviderError> {
        let args = os_args(&["ec2", "deregister-image", "--image-id", image_id]);
        self.cli.run_discarding(region, &args)
    }

    fn create_key_pair(
        &self,
        name: &str,
        region: &str,
    ) -> Result<KeyPairMaterial, ProviderError> {
        let args = os_args(&[
            "ec2",
            "create-key-pair",
            "--key-name",
            name,
            "--key-type",
            "rsa",
            "--key-format",
            "pem",
        ]);
        let response: CreateKeyPairResponse = self.cli.run_json(region, &args, "key pair")?;
        Ok(KeyPairMaterial {
            name: response.key_name,
            private_key: response.key_material,
        })
    }

    fn delete_key_pair(&self, name: &str, region: &str) -> Result<(), ProviderError> {
        let args = os_args(&["ec2", "delete-key-pair", "--key-name", name]);
        self.cli.run_discarding(region, &args)
    }

    fn create_security_group(
        &self,
        name: &str,
        description: &str,
        region: &str,
    ) -> Result<String, ProviderError> {
        let vpcs: DescribeVpcsResponse = self.cli.run_json(
            region,
            &os_args(&[
                "ec2",
                "describe-vpcs",
                "--filters",
                "Name=isDefault,Values=true",
            ]),
            "vpcs",
        )?;
        let vpc_id = vpcs
            .vpcs
            .into_iter()
            .next()
            .map(|vpc| vpc.vpc_id)
            .ok_or_else(|| ProviderError::Missing {
                what: format!("default VPC in {region}"),
            })?;

        let created: CreateSecurityGroupResponse = self.cli.run_json(
            region,
            &os_args(&[
                "ec2",
                "create-security-group",
                "--group-name",
                name,
                "--description",
                description,
                "--vpc-id",
                &vpc_id,
            ]),
            "security group",
        )?;
        let group_id = created.group_id;

        let ingress = json!([{
            "IpProtocol": "tcp",
            "FromPort": 22,
            "ToPort": 22,
            "IpRanges": [{"CidrIp": "0.0.0.0/0", "Description": "remote session access"}]
        }]);
        self.cli.run_discarding(
            region,
            &os_args(&[
                "ec2",
                "authorize-security-group-ingress",
                "--group-id",
                &group_id,
                "--ip-permissions",
                &ingress.to_string(),
            ]),
        )?;

        // The default group allows all egress; revoke it before installing
        // the explicit allowlist.
        let default_egress = json!([{
            "IpProtocol": "-1",
            "IpRanges": [{"CidrIp": "0.0.0.0/0"}]
        }]);
        self.cli.run_discarding(
            region,
            &os_args(&[
                "ec2",
                "revoke-security-group-egress",
                "--group-id",
                &group_id,
                "--ip-permissions",
                &default_egress.to_string(),
            ]),
        )?;

        let egress = json!([
            {"IpProtocol": "tcp", "FromPort": 443, "ToPort": 443,
             "IpRanges": [{"CidrIp": "0.0.0.0/0", "Description": "secure transport"}]},
            {"IpProtocol": "tcp", "FromPort": 80, "ToPort": 80,
             "IpRanges": [{"CidrIp": "0.0.0.0/0", "Description": "plaintext web"}]},
            {"IpProtocol": "udp", "FromPort": 53, "ToPort": 53,
             "IpRanges": [{"CidrIp": "0.0.0.0/0", "Description": "name resolution"}]},
            {"IpProtocol": "udp", "FromPort": 123, "ToPort": 123,
             "IpRanges": [{"CidrIp": "0.0.0.0/0", "Description": "time sync"}]}
        ]);
        self.cli.run_discarding(
            region,
            &os_args(&[
                "ec2",
                "authorize-security-group-egress",
                "--group-id",
                &group_id,
                "--ip-permissions",
                &egress.to_string(),
            ]),
        )?;

        Ok(group_id)
    }

    fn delete_security_group(&self, group_id: &str, region: &str) -> Result<(), ProviderError> {
        let args = os_args(&["ec2", "delete-security-group", "--group-id", group_id]);
        self.cli.run_discarding(region, &args)
    }

    fn run_instance(
        &self,
        spec: &InstanceLaunchSpec,
        region: &str,
    ) -> Result<String, ProviderError> {
        let block_devices = json!([{
            "DeviceName": "/dev/xvda",
            "Ebs": {
                "VolumeSize": spec.root_volume_gib,
                "VolumeType": "gp3",
                "DeleteOnTermination": true
            }
        }]);
        let tags = json!([{
            "ResourceType": "instance",
            "Tags": [
                {"Key": "Name", "Value": spec.name_tag},
                {"Key": "Purpose", "Value": "ephemeral-image-build"}
            ]
        }]);
        let args = os_args(&[
            "ec2",
            "run-instances",
            "--image-id",
            &spec.base_image_id,
            "--instance-type",
            &spec.instance_type,
            "--key-name",
            &spec.key_pair_name,
            "--security-group-ids",
            &spec.security_group_id,
            "--count",
            "1",
            "--block-device-mappings",
            &block_devices.to_string(),
            "--tag-specifications",
            &tags.to_string(),
        ]);
        let response: RunInstancesResponse = self.cli.run_json(region, &args, "instances")?;
        response
            .instances
            .into_iter()
            .next()
            .map(|instance| instance.instance_id)
            .ok_or_else(|| ProviderError::Missing {
                what: String::from("instance in run-instances response"),
            })
    }

    fn describe_instance(
        &self,
        instance_id: &str,
        region: &str,
    ) -> Result<Option<InstanceDescription>, ProviderError> {
        let args = os_args(&["ec2", "describe-instances", "--instance-ids", instance_id]);
        let response: Result<DescribeInstancesResponse, ProviderError> =
            self.cli.run_json(region, &args, "instances");
        let response = match response {
            Ok(value) => value,
            Err(err) if failure_names(&err, MISSING_INSTANCE_MARKERS) => {
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let instance = response
            .reservations
            .into_iter()
            .flat_map(|reservation| reservation.instances)
            .next();
        Ok(instance.map(|inst| InstanceDescription {
            state: inst.state.name,
            public_ip: inst
                .public_ip_address
                .and_then(|ip| IpAddr::from_str(&ip).ok()),
        }))
    }

    fn stop_instance(&self, instance_id: &str, region: &str) -> Result<(), ProviderError> {
        let args = os_args(&["ec2", "stop-instances", "--instance-ids", instance_id]);
        self.cli.run_discarding(region, &args)
    }

    fn terminate_instance(&self, instance_id: &str, region: &str) -> Result<(), ProviderError> {
        let args = os_args(&["ec2", "terminate-instances", "--instance-ids", instance_id]);
        self.cli.run_discarding(region, &args)
    }

    fn create_image(
        &self,
        instance_id: &str,
        name: &str,
        description: &str,
        region: &str,
    ) -> Result<String, ProviderError> {
        let args = os_args(&[
            "ec2",
            "create-image",
            "--instance-id",
            instance_id,
            "--name",
            name,
            "--description",
            description,
            "--no-reboot",
        ]);
        let response: ImageIdResponse = self.cli.run_json(region, &args, "image")?;
        Ok(response.image_id)
    }
}

#[derive(Debug, Deserialize)]
struct DescribeImagesResponse {
    #[serde(rename = "Images", default)]
    images: Vec<AwsImage>,
}

#[derive(Debug, Deserialize)]
struct AwsImage {
    #[serde(rename = "ImageId")]
    image_id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "CreationDate", default)]
    creation_date: Option<String>,
}

impl From<AwsImage> for ImageSummary {
    fn from(image: AwsImage) -> Self {
        Self {
            id: image.image_id,
            name: image.name,
            state: image.state,
            created_at: image
                .creation_date
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|parsed| parsed.with_timezone(&Utc)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImageIdResponse {
    #[serde(rename = "ImageId")]
    image_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateKeyPairResponse {
    #[serde(rename = "KeyName")]
    key_name: String,
    #[serde(rename = "KeyMaterial")]
    key_material: String,
}

#[derive(Debug, Deserialize)]
struct DescribeVpcsResponse {
    #[serde(rename = "Vpcs", default)]
    vpcs: Vec<AwsVpc>,
}

#[derive(Debug, Deserialize)]
struct AwsVpc {
    #[serde(rename = "VpcId")]
    vpc_id: String,
}

#[derive(Debug, Deserialize)]
struct CreateSecurityGroupResponse {
    #[serde(rename = "GroupId")]
    group_id: String,
}

#[derive(Debug, Deserialize)]
struct RunInstancesResponse {
    #[serde(rename = "Instances", default)]
    instances: Vec<AwsInstanceId>,
}

#[derive(Debug, Deserialize)]
struct AwsInstanceId {
    #[serde(rename = "InstanceId")]
    instance_id: String,
}

#[derive(Debug, Deserialize)]
struct DescribeInstancesResponse {
    #[serde(rename = "Reservations", default)]
    reservations: Vec<AwsReservation>,
}

#[derive(Debug, Deserialize)]
struct AwsReservation {
    #[serde(rename = "Instances", default)]
    instances: Vec<AwsInstance>,
}

#[derive(Debug, Deserialize)]
struct AwsInstance {
    #[serde(rename = "State")]
    state: AwsInstanceState,
    #[serde(rename = "PublicIpAddress", default)]
    public_ip_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AwsInstanceState {
    #[serde(rename = "Name")]
    name: String,
}
